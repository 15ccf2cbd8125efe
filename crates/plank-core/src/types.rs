use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// External issue tracker that can push webhooks into plank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Github,
    Jira,
    Linear,
}

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[Provider::Github, Provider::Jira, Provider::Linear]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Jira => "jira",
            Provider::Linear => "linear",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = crate::error::PlankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Provider::Github),
            "jira" => Ok(Provider::Jira),
            "linear" => Ok(Provider::Linear),
            _ => Err(crate::error::PlankError::UnknownProvider(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Best-effort mapping from a tracker's status vocabulary to a local status.
    ///
    /// Matching is case-insensitive and treats spaces and dashes as underscores,
    /// so "In Progress", "in-progress" and "in_progress" are equivalent.
    /// Unrecognized statuses return `None` and leave the local status alone.
    pub fn from_external(raw: &str) -> Option<TaskStatus> {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "closed" | "done" | "completed" | "complete" | "resolved" | "merged" => {
                Some(TaskStatus::Done)
            }
            "open" | "opened" | "reopened" | "todo" | "to_do" | "backlog" | "unstarted"
            | "triage" | "pending" => Some(TaskStatus::Pending),
            "in_progress" | "started" | "in_review" | "doing" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
