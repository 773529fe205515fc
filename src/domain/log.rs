use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static LOG_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(trace|debug|info|warn(?:ing)?|error|fatal|panic)\b"#)
        .expect("log level regex must compile")
});

/// Detect a log level keyword in a line of process output.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    LOG_LEVEL_RE.find(text).and_then(|m| {
        let s = m.as_str().to_lowercase();
        match s.as_str() {
            "trace" | "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "fatal" | "panic" => Some(LogLevel::Error),
            _ => None,
        }
    })
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub project_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(project_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build an entry for a captured output line. Stdout defaults to `info`,
    /// stderr to `error`, unless the text names its own level.
    pub fn from_output(project_id: &str, text: String, is_stderr: bool) -> Self {
        let fallback = if is_stderr {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        let level = detect_log_level(&text).unwrap_or(fallback);
        Self::new(project_id, level, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_level_keywords() {
        assert_eq!(detect_log_level("[INFO] starting"), Some(LogLevel::Info));
        assert_eq!(detect_log_level("WARNING: deprecated"), Some(LogLevel::Warn));
        assert_eq!(
            detect_log_level(r#"{"level":"error","msg":"fail"}"#),
            Some(LogLevel::Error)
        );
        assert_eq!(detect_log_level("TRACE entering"), Some(LogLevel::Debug));
        assert_eq!(detect_log_level("just a plain message"), None);
    }

    #[test]
    fn output_fallback_depends_on_stream() {
        let out = LogEntry::from_output("web", "listening".into(), false);
        assert_eq!(out.level, LogLevel::Info);
        let err = LogEntry::from_output("web", "compiling".into(), true);
        assert_eq!(err.level, LogLevel::Error);
        let warn = LogEntry::from_output("web", "warn: slow".into(), true);
        assert_eq!(warn.level, LogLevel::Warn);
    }

    #[test]
    fn entry_serializes_lowercase_level() {
        let entry = LogEntry::new("api", LogLevel::Warn, "careful");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"level\":\"warn\""));
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
