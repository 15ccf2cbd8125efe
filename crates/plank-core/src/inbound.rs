use crate::types::{Provider, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-agnostic view of a single inbound webhook.
///
/// Built by a provider handler from the raw payload, handed to the
/// processor, then dropped. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub provider: Provider,
    pub event_type: String,
    pub external_id: String,
    /// Local task id carried by the payload. Empty when the external item is
    /// not linked to a tracked task.
    #[serde(default)]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        provider: Provider,
        event_type: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            event_type: event_type.into(),
            external_id: external_id.into(),
            task_id: String::new(),
            status: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_status(mut self, status: Option<TaskStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_tracked(&self) -> bool {
        !self.task_id.is_empty()
    }
}
