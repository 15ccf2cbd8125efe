//! Per-provider webhook handling: authenticate the raw request, then turn the
//! provider's JSON into an [`InboundEvent`].
//!
//! Every provider also understands a flat shape with top-level `task_id`,
//! `status`, `external_id` and `event_type` strings. Those fields win over
//! whatever the native payload says, which lets custom automations drive the
//! sync without mimicking a tracker's full schema.

pub mod github;
pub mod jira;
pub mod linear;

use std::sync::{Arc, OnceLock};

use plank_core::error::{PlankError, Result};
use plank_core::inbound::InboundEvent;
use plank_core::types::{Provider, TaskStatus};
use regex::Regex;
use serde_json::Value;

pub use github::GithubHandler;
pub use jira::JiraHandler;
pub use linear::LinearHandler;

use crate::signature::WebhookRequest;

/// Verify-and-parse capability for one external tracker.
pub trait ProviderHandler: Send + Sync {
    fn provider(&self) -> Provider;

    /// Authenticate the request with the configured secret. Only called when a
    /// secret is set for this provider.
    fn verify(&self, secret: &str, request: &WebhookRequest<'_>) -> bool;

    /// Build the canonical event. Must not touch any state.
    fn parse(&self, body: &[u8]) -> Result<InboundEvent>;
}

/// Handlers for every supported provider.
pub fn default_handlers() -> Vec<Arc<dyn ProviderHandler>> {
    vec![
        Arc::new(GithubHandler),
        Arc::new(JiraHandler),
        Arc::new(LinearHandler),
    ]
}

// ---------------------------------------------------------------------------
// Shared parsing helpers
// ---------------------------------------------------------------------------

/// Fields a handler pulled out of its native payload shape.
#[derive(Debug, Default)]
pub(crate) struct NativeFields {
    pub event_type: Option<String>,
    pub external_id: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<TaskStatus>,
}

pub(crate) fn parse_json_object(body: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| PlankError::PayloadParse(format!("body is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(PlankError::PayloadParse(
            "expected a JSON object at the top level".into(),
        ));
    }
    Ok(value)
}

/// Read a string-ish field. Numbers are rendered, empty strings are ignored.
pub(crate) fn text(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Names from an array of label objects (`[{ "name": .. }]`) or plain strings.
pub(crate) fn label_names(value: &Value, pointer: &str) -> Vec<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| match l {
                    Value::String(s) => Some(s.clone()),
                    other => other.get("name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

static TASK_MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn task_marker_re() -> &'static Regex {
    TASK_MARKER_RE.get_or_init(|| {
        Regex::new(r"(?i)\bplank(?:-task)?:\s*([A-Za-z0-9][A-Za-z0-9._-]*)")
            .expect("infallible: static regex")
    })
}

/// First `plank:<task-id>` / `plank-task:<task-id>` marker across `texts`.
pub(crate) fn find_task_marker<'a>(texts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    texts.into_iter().find_map(|t| {
        task_marker_re()
            .captures(t)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Merge native fields with flat overrides and build the event.
pub(crate) fn finish_event(
    provider: Provider,
    root: &Value,
    native: NativeFields,
) -> Result<InboundEvent> {
    let external_id = text(root, "/external_id")
        .or(native.external_id)
        .ok_or_else(|| {
            PlankError::PayloadParse(format!("{provider} payload has no external issue id"))
        })?;
    let event_type = text(root, "/event_type")
        .or(native.event_type)
        .unwrap_or_else(|| "webhook".to_string());
    let task_id = text(root, "/task_id").or(native.task_id).unwrap_or_default();
    let status = match text(root, "/status") {
        Some(raw) => TaskStatus::from_external(&raw),
        None => native.status,
    };

    Ok(InboundEvent::new(provider, event_type, external_id)
        .with_task_id(task_id)
        .with_status(status))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_found_in_text() {
        assert_eq!(
            find_task_marker(["Fix login", "Tracks plank:auth-12 upstream"]),
            Some("auth-12".into())
        );
        assert_eq!(
            find_task_marker(["plank-task: T3"]),
            Some("T3".into())
        );
        assert_eq!(find_task_marker(["PLANK:t1"]), Some("t1".into()));
        assert_eq!(find_task_marker(["no marker", "planks: nope"]), None);
    }

    #[test]
    fn flat_fields_override_native() {
        let root = serde_json::json!({ "task_id": "t1", "status": "done", "external_id": "gh-42" });
        let native = NativeFields {
            external_id: Some("gh-1".into()),
            task_id: Some("other".into()),
            status: Some(TaskStatus::Pending),
            ..Default::default()
        };
        let event = finish_event(Provider::Github, &root, native).unwrap();
        assert_eq!(event.external_id, "gh-42");
        assert_eq!(event.task_id, "t1");
        assert_eq!(event.status, Some(TaskStatus::Done));
        assert_eq!(event.event_type, "webhook");
    }

    #[test]
    fn unknown_flat_status_clears_status() {
        let root = serde_json::json!({ "external_id": "x", "status": "wontfix" });
        let native = NativeFields {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        let event = finish_event(Provider::Jira, &root, native).unwrap();
        assert_eq!(event.status, None);
    }

    #[test]
    fn missing_external_id_is_parse_error() {
        let root = serde_json::json!({ "task_id": "t1" });
        let err = finish_event(Provider::Linear, &root, NativeFields::default()).unwrap_err();
        assert!(matches!(err, PlankError::PayloadParse(_)));
    }

    #[test]
    fn non_object_body_rejected() {
        assert!(matches!(
            parse_json_object(b"[1,2,3]"),
            Err(PlankError::PayloadParse(_))
        ));
        assert!(matches!(
            parse_json_object(b"not json"),
            Err(PlankError::PayloadParse(_))
        ));
    }

    #[test]
    fn text_renders_numbers() {
        let v = serde_json::json!({ "issue": { "number": 42, "title": "  " } });
        assert_eq!(text(&v, "/issue/number"), Some("42".into()));
        assert_eq!(text(&v, "/issue/title"), None);
    }

    #[test]
    fn default_handlers_cover_every_provider() {
        let providers: Vec<Provider> = default_handlers().iter().map(|h| h.provider()).collect();
        assert_eq!(providers, Provider::all());
    }
}
