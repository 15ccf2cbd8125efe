//! Durable record of outbound deliveries that exhausted their retries.
//!
//! Entries are appended once and never rewritten. Replaying them is left to
//! external tooling; [`FileDeadLetterStore::load_all`] exists for inspection.

use crate::error::Result;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub endpoint_name: String,
    pub event_payload: serde_json::Value,
    pub failure_reason: String,
    pub attempt_count: u32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

/// Append-only sink for dead letters. Must tolerate concurrent callers.
pub trait DeadLetterSink: Send + Sync {
    fn append(&self, entry: &DeadLetterEntry) -> Result<()>;
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON-lines store at `.plank/webhooks/dead_letters.jsonl`.
#[derive(Debug)]
pub struct FileDeadLetterStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDeadLetterStore {
    pub fn new(root: &Path) -> Self {
        Self::at(paths::dead_letters_path(root))
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry in append order. A missing file is an empty store.
    pub fn load_all(&self) -> Result<Vec<DeadLetterEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

impl DeadLetterSink for FileDeadLetterStore {
    fn append(&self, entry: &DeadLetterEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        crate::io::append_line(&self.path, &line)
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryDeadLetterStore {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl DeadLetterSink for MemoryDeadLetterStore {
    fn append(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
