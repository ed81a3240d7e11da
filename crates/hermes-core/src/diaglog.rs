//! Bounded circular diagnostic log persisted in the durable namespace.
//!
//! Network and storage failures are appended unconditionally so post-hoc
//! diagnosis works even with verbose logging disabled; only console
//! output is gated by the debug flag.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of retained entries; oldest are evicted first.
pub const LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// In-memory view of the circular log. The runtime reads the persisted
/// entries, appends, and writes back the bounded result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagLog {
    entries: VecDeque<LogEntry>,
}

impl DiagLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, dropping any overflow beyond
    /// capacity (oldest first).
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        let mut log = Self {
            entries: entries.into(),
        };
        while log.entries.len() > LOG_CAPACITY {
            log.entries.pop_front();
        }
        log
    }

    /// Append an entry, evicting the oldest when at capacity.
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, now: DateTime<Utc>) {
        if self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: now,
            level,
            message: message.into(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializable snapshot for persistence.
    pub fn to_entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}
