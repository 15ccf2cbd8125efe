//! Applies inbound tracker events to execution state.
//!
//! External status is applied as reported: there is no transition check here,
//! so a task can move from `done` back to `pending` when the tracker reopens
//! the issue. CLI-driven transitions go through their own validation.

use crate::error::Result;
use crate::inbound::InboundEvent;
use crate::state::{ExecutionState, StateRepository};
use crate::types::TaskStatus;
use serde::Serialize;

/// What processing an event did to the tracked state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The event carried no task id; nothing was read or written.
    Untracked,
    Synced {
        task_id: String,
        status: TaskStatus,
        status_changed: bool,
    },
}

impl ProcessOutcome {
    pub fn status_changed(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::Synced {
                status_changed: true,
                ..
            }
        )
    }
}

pub struct EventProcessor<R> {
    repo: R,
}

impl<R: StateRepository> EventProcessor<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Upsert the task referenced by `event`.
    ///
    /// State is loaded once, mutated in memory and saved once; a load or save
    /// failure is returned unchanged and nothing is partially applied.
    pub fn process_event(&self, event: &InboundEvent) -> Result<ProcessOutcome> {
        if !event.is_tracked() {
            tracing::debug!(
                provider = %event.provider,
                external_id = %event.external_id,
                "event does not reference a tracked task"
            );
            return Ok(ProcessOutcome::Untracked);
        }

        let mut state = self.repo.load()?.unwrap_or_else(ExecutionState::new);

        let task = state.task_entry(&event.task_id);
        let mut status_changed = false;
        if let Some(status) = event.status {
            if task.status != status {
                task.status = status;
                status_changed = true;
            }
        }
        task.upsert_external_ref(
            event.provider.as_str(),
            event.external_id.clone(),
            event.timestamp,
        );
        let status = task.status;

        state.touch();
        self.repo.save(&state)?;

        if status_changed {
            tracing::info!(
                task = %event.task_id,
                %status,
                provider = %event.provider,
                "task status updated from tracker"
            );
        }

        Ok(ProcessOutcome::Synced {
            task_id: event.task_id.clone(),
            status,
            status_changed,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
