//! Session log
//!
//! Append-only record of one generation session. Purely observational: every
//! entry is mirrored to `tracing` and the whole log can be exported as text.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a session log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// A single log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub module: String,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.module.to_uppercase(),
            self.message
        )
    }
}

/// Shared, append-only session log
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, level: LogLevel, module: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(module, "{}", message),
            LogLevel::Info | LogLevel::Success => tracing::info!(module, "{}", message),
            LogLevel::Warn => tracing::warn!(module, "{}", message),
            LogLevel::Error => tracing::error!(module, "{}", message),
        }
        self.entries.write().push(LogEntry {
            timestamp: Utc::now(),
            level,
            module: module.to_string(),
            message,
        });
    }

    pub fn debug(&self, module: &str, message: impl Into<String>) {
        self.append(LogLevel::Debug, module, message);
    }

    pub fn info(&self, module: &str, message: impl Into<String>) {
        self.append(LogLevel::Info, module, message);
    }

    pub fn success(&self, module: &str, message: impl Into<String>) {
        self.append(LogLevel::Success, module, message);
    }

    pub fn warn(&self, module: &str, message: impl Into<String>) {
        self.append(LogLevel::Warn, module, message);
    }

    pub fn error(&self, module: &str, message: impl Into<String>) {
        self.append(LogLevel::Error, module, message);
    }

    /// Snapshot of every entry so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries from one module, in order
    pub fn by_module(&self, module: &str) -> Vec<LogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.module == module)
            .cloned()
            .collect()
    }

    /// `[HH:MM:SS] [LEVEL] [MODULE] message` lines
    pub fn export_text(&self) -> String {
        self.entries
            .read()
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
