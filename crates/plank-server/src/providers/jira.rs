use plank_core::error::Result;
use plank_core::inbound::InboundEvent;
use plank_core::types::{Provider, TaskStatus};
use serde_json::Value;

use super::{finish_event, find_task_marker, label_names, parse_json_object, text, NativeFields};
use crate::signature::{bearer_token, constant_time_eq, WebhookRequest};

/// Query parameters accepted in place of a bearer token, in lookup order.
const SECRET_PARAMS: [&str; 2] = ["secret", "token"];

/// Jira issue webhooks.
///
/// Jira cannot sign payloads, so the shared secret travels either as
/// `Authorization: Bearer <secret>` or as a `?secret=` query parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct JiraHandler;

impl super::ProviderHandler for JiraHandler {
    fn provider(&self) -> Provider {
        Provider::Jira
    }

    fn verify(&self, secret: &str, request: &WebhookRequest<'_>) -> bool {
        if let Some(token) = bearer_token(request.headers) {
            if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
                return true;
            }
        }
        SECRET_PARAMS.iter().any(|param| {
            request
                .query
                .get(*param)
                .is_some_and(|v| constant_time_eq(v.as_bytes(), secret.as_bytes()))
        })
    }

    fn parse(&self, body: &[u8]) -> Result<InboundEvent> {
        let root = parse_json_object(body)?;
        let native = native_fields(&root);
        finish_event(Provider::Jira, &root, native)
    }
}

fn native_fields(root: &Value) -> NativeFields {
    let event_type = text(root, "/webhookEvent").or_else(|| text(root, "/issue_event_type_name"));
    let external_id = text(root, "/issue/key").or_else(|| text(root, "/issue/id"));
    let status = text(root, "/issue/fields/status/name")
        .as_deref()
        .and_then(TaskStatus::from_external);

    let labels = label_names(root, "/issue/fields/labels");
    let summary = text(root, "/issue/fields/summary").unwrap_or_default();
    // Cloud sends rich-text descriptions as objects; only plain strings are scanned.
    let description = text(root, "/issue/fields/description").unwrap_or_default();
    let task_id = find_task_marker(
        labels
            .iter()
            .map(String::as_str)
            .chain([summary.as_str(), description.as_str()]),
    );

    NativeFields {
        event_type,
        external_id,
        task_id,
        status,
    }
}
