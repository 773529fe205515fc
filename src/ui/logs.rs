use std::collections::{BTreeMap, HashSet};

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{LogEntry, LogLevel};

// ---------------------------------------------------------------------------
// LogWriter: colored terminal output with owo-colors
// ---------------------------------------------------------------------------

/// Streams live log entries to stdout, one prefixed line per entry.
pub struct LogWriter {
    rx: broadcast::Receiver<LogEntry>,
    projects: Option<HashSet<String>>,
    max_name_len: usize,
    use_color: bool,
}

/// Color palette for project names (using owo-colors).
const PROJECT_COLORS: &[fn(&str) -> String] = &[
    |s| format!("{}", s.cyan()),
    |s| format!("{}", s.yellow()),
    |s| format!("{}", s.green()),
    |s| format!("{}", s.magenta()),
    |s| format!("{}", s.blue()),
    |s| format!("{}", s.red()),
];

fn format_level(level: LogLevel, use_color: bool) -> String {
    if !use_color {
        return format!("{:>5} ", level.as_str());
    }
    match level {
        LogLevel::Debug => format!("{} ", level.as_str().blue()),
        LogLevel::Info => format!("{} ", level.as_str().green()),
        LogLevel::Warn => format!("{} ", level.as_str().yellow()),
        LogLevel::Error => format!("{} ", level.as_str().red()),
    }
}

/// Render one entry as `<project> | <LEVEL> <message>`.
pub fn format_entry(entry: &LogEntry, color_idx: usize, max_name_len: usize, use_color: bool) -> String {
    let mut buf = String::new();
    if use_color {
        let padding = max_name_len.saturating_sub(entry.project_id.len());
        buf.push_str(&" ".repeat(padding));
        buf.push_str(&PROJECT_COLORS[color_idx % PROJECT_COLORS.len()](&entry.project_id));
        buf.push_str(&format!(" {} ", "|".dimmed()));
    } else {
        buf.push_str(&format!(
            "{:>width$} | ",
            entry.project_id,
            width = max_name_len,
        ));
    }
    buf.push_str(&format_level(entry.level, use_color));
    if use_color && entry.level == LogLevel::Error {
        buf.push_str(&format!("{}", entry.message.red()));
    } else {
        buf.push_str(&entry.message);
    }
    buf
}

impl LogWriter {
    /// `projects` limits output to those ids; `None` shows everything.
    pub fn new(rx: broadcast::Receiver<LogEntry>, projects: Option<HashSet<String>>) -> Self {
        let max_name_len = projects
            .as_ref()
            .and_then(|p| p.iter().map(String::len).max())
            .unwrap_or(0);
        Self {
            rx,
            projects,
            max_name_len,
            use_color: std::io::stdout().is_terminal(),
        }
    }

    /// Print until `cancel` fires or every sender is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut color_map: BTreeMap<String, usize> = BTreeMap::new();

        loop {
            let entry = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.rx.recv() => match received {
                    Ok(entry) => entry,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "log output fell behind, lines dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if let Some(filter) = &self.projects {
                if !filter.contains(&entry.project_id) {
                    continue;
                }
            }

            let next = color_map.len();
            let color_idx = *color_map.entry(entry.project_id.clone()).or_insert(next);
            self.max_name_len = self.max_name_len.max(entry.project_id.len());
            println!(
                "{}",
                format_entry(&entry, color_idx, self.max_name_len, self.use_color)
            );
        }
    }
}

/// Print stored entries with a timestamp column, for `devhost logs`.
pub fn print_entries(entries: &[LogEntry]) {
    let use_color = std::io::stdout().is_terminal();
    let width = entries
        .iter()
        .map(|e| e.project_id.len())
        .max()
        .unwrap_or(0);
    for entry in entries {
        let ts = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
        let line = format_entry(entry, 0, width, use_color);
        if use_color {
            println!("{} {line}", ts.dimmed());
        } else {
            println!("{ts} {line}");
        }
    }
}
