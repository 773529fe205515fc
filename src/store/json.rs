use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::{keep_tail, ProjectRepository, StoreError};
use crate::domain::{LogEntry, Project};

const PROJECTS_FILE: &str = "projects.json";
const LOCK_FILE: &str = "projects.json.lock";
const LOGS_DIR: &str = "logs";

/// File-backed repository under the state directory:
///
/// ```text
/// <state_dir>/projects.json        all project records, keyed by id
/// <state_dir>/logs/<id>.jsonl      append-only log entries per project
/// ```
///
/// Writes to `projects.json` go through a tmp file + rename, under an
/// exclusive `flock` so two devhost processes never interleave a
/// read-modify-write.
pub struct JsonStore {
    dir: PathBuf,
    // Serialises writers inside this process; the flock covers other processes.
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let logs = dir.join(LOGS_DIR);
        std::fs::create_dir_all(&logs).map_err(|source| StoreError::Io {
            path: logs.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn projects_path(&self) -> PathBuf {
        self.dir.join(PROJECTS_FILE)
    }

    fn log_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(LOGS_DIR).join(format!("{project_id}.jsonl"))
    }

    fn load_all(&self) -> Result<BTreeMap<String, Project>, StoreError> {
        let path = self.projects_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt { path, source })
    }

    fn write_all(&self, projects: &BTreeMap<String, Project>) -> Result<(), StoreError> {
        let path = self.projects_path();
        let content = serde_json::to_string_pretty(projects).map_err(|source| {
            StoreError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;
        // Atomic write: write to tmp file then rename
        let tmp_path = self.dir.join(format!("{PROJECTS_FILE}.tmp"));
        std::fs::write(&tmp_path, content).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { path, source })
    }

    /// Acquire an exclusive file lock; released when the handle drops.
    fn lock_file(&self) -> Option<File> {
        let lock_file = File::create(self.dir.join(LOCK_FILE)).ok()?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: fd is valid for the lifetime of lock_file
            unsafe {
                libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX);
            }
        }

        Some(lock_file)
    }
}

impl ProjectRepository for JsonStore {
    fn list(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.load_all()?.into_values().collect())
    }

    fn get(&self, id: &str) -> Result<Project, StoreError> {
        self.load_all()?
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, project: &Project) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let _flock = self.lock_file();
        let mut all = self.load_all()?;
        all.insert(project.id.clone(), project.clone());
        self.write_all(&all)?;
        debug!(project = %project.id, status = %project.status, pid = project.pid, "project saved");
        Ok(())
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let path = self.log_path(&entry.project_id);
        let mut line = serde_json::to_string(entry).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| StoreError::Io { path, source })
    }

    fn logs(&self, project_id: &str, tail: Option<usize>) -> Result<Vec<LogEntry>, StoreError> {
        let path = self.log_path(project_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                // A torn final line from a crash should not hide the rest.
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable log line"),
            }
        }
        Ok(keep_tail(entries, tail))
    }
}
