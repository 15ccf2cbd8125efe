use crate::error::Result;
use crate::paths;
use crate::types::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Link between a local task and an item in an external tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub id: String,
    pub last_synced_at: DateTime<Utc>,
}

/// Tracked result record for a single task.
///
/// `external_refs` is keyed by provider name and always present; a record
/// built through [`TaskResult::pending`] or deserialized from disk starts
/// with an empty map rather than a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub external_refs: BTreeMap<String, ExternalRef>,
}

impl TaskResult {
    pub fn pending() -> Self {
        Self::with_status(TaskStatus::Pending)
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status,
            owner: None,
            external_refs: BTreeMap::new(),
        }
    }

    /// Insert or overwrite the reference for `provider`.
    pub fn upsert_external_ref(
        &mut self,
        provider: &str,
        id: impl Into<String>,
        synced_at: DateTime<Utc>,
    ) {
        self.external_refs.insert(
            provider.to_string(),
            ExternalRef {
                id: id.into(),
                last_synced_at: synced_at,
            },
        );
    }
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskResult>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            version: 1,
            tasks: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskResult> {
        self.tasks.get(id)
    }

    /// Return the result entry for `id`, creating a pending one if absent.
    pub fn task_entry(&mut self, id: &str) -> &mut TaskResult {
        self.tasks
            .entry(id.to_string())
            .or_insert_with(TaskResult::pending)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Storage seam for execution state.
///
/// Implementations own their readers/writers discipline. The processor loads,
/// mutates in memory and saves once per event, so two concurrent events for
/// the same task can lose an update unless the implementation serializes them.
pub trait StateRepository: Send + Sync {
    /// Load the current state, or `None` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<ExecutionState>>;

    fn save(&self, state: &ExecutionState) -> Result<()>;
}

impl<T: StateRepository + ?Sized> StateRepository for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<ExecutionState>> {
        (**self).load()
    }

    fn save(&self, state: &ExecutionState) -> Result<()> {
        (**self).save(state)
    }
}

/// YAML-backed repository at `.plank/state.yaml`.
#[derive(Debug, Clone)]
pub struct FileStateRepository {
    path: PathBuf,
}

impl FileStateRepository {
    pub fn new(root: &Path) -> Self {
        Self {
            path: paths::state_path(root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateRepository for FileStateRepository {
    fn load(&self) -> Result<Option<ExecutionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let state: ExecutionState = serde_yaml::from_str(&data)?;
        Ok(Some(state))
    }

    fn save(&self, state: &ExecutionState) -> Result<()> {
        let data = serde_yaml::to_string(state)?;
        crate::io::atomic_write(&self.path, data.as_bytes())
    }
}

/// In-memory repository, used by tests and embedders without a project root.
#[derive(Debug, Default)]
pub struct MemoryStateRepository {
    state: Mutex<Option<ExecutionState>>,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ExecutionState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    pub fn snapshot(&self) -> Option<ExecutionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StateRepository for MemoryStateRepository {
    fn load(&self) -> Result<Option<ExecutionState>> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &ExecutionState) -> Result<()> {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(state.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
