//! User-visible activity log
//!
//! Ordered, append-only within a session, cleared when a new session starts.
//! Truncation for display is left to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Vec<LogEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line stamped with the current time
    pub fn append(&mut self, text: impl Into<String>) -> &LogEntry {
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            text: text.into(),
        });
        let last = self.entries.len() - 1;
        &self.entries[last]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries from `index` on
    pub fn since(&self, index: usize) -> &[LogEntry] {
        self.entries.get(index..).unwrap_or(&[])
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.text.as_str())
    }

    pub fn contains(&self, text: &str) -> bool {
        self.lines().any(|line| line == text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
