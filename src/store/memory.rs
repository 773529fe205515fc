use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{keep_tail, ProjectRepository, StoreError};
use crate::domain::{LogEntry, Project};

/// Ephemeral repository for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<BTreeMap<String, Project>>,
    logs: Mutex<Vec<LogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.projects.lock() {
            for p in projects {
                map.insert(p.id.clone(), p);
            }
        }
        store
    }
}

impl ProjectRepository for MemoryStore {
    fn list(&self) -> Result<Vec<Project>, StoreError> {
        let map = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Project, StoreError> {
        let map = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        map.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, project: &Project) -> Result<(), StoreError> {
        let mut map = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(project.id.clone(), project.clone());
        Ok(())
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.push(entry.clone());
        Ok(())
    }

    fn logs(&self, project_id: &str, tail: Option<usize>) -> Result<Vec<LogEntry>, StoreError> {
        let logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let matching = logs
            .iter()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect();
        Ok(keep_tail(matching, tail))
    }
}
