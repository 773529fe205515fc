use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::LogEntry;

/// Entries retained across all projects sharing one buffer.
pub const LOG_BUFFER_CAPACITY: usize = 1000;

/// Ring buffer of recent process output, shared by every project a runner
/// supervises and filtered by project id on read.
pub struct LogBuffer {
    lines: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_BUFFER_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Push an entry, evicting the oldest if at capacity.
    pub fn push(&self, entry: LogEntry) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(entry);
    }

    /// Entries for one project in insertion order; `tail` keeps the last N.
    pub fn entries(&self, project_id: &str, tail: Option<usize>) -> Vec<LogEntry> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<LogEntry> = lines
            .iter()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect();
        crate::store::keep_tail(matching, tail)
    }

    /// Drop every entry belonging to a project.
    pub fn clear(&self, project_id: &str) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.retain(|e| e.project_id != project_id);
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
