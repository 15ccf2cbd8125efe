use plank_core::error::Result;
use plank_core::inbound::InboundEvent;
use plank_core::types::{Provider, TaskStatus};
use serde_json::Value;

use super::{finish_event, find_task_marker, label_names, parse_json_object, text, NativeFields};
use crate::signature::{verify_hmac_sha256_hex, WebhookRequest};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// GitHub issue and pull request webhooks.
///
/// Authenticated with `X-Hub-Signature-256: sha256=<hex>` over the raw body.
#[derive(Debug, Default, Clone, Copy)]
pub struct GithubHandler;

impl super::ProviderHandler for GithubHandler {
    fn provider(&self) -> Provider {
        Provider::Github
    }

    fn verify(&self, secret: &str, request: &WebhookRequest<'_>) -> bool {
        let Some(header) = request.header(SIGNATURE_HEADER) else {
            return false;
        };
        let Some(signature) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };
        verify_hmac_sha256_hex(secret, request.body, signature)
    }

    fn parse(&self, body: &[u8]) -> Result<InboundEvent> {
        let root = parse_json_object(body)?;
        let native = native_fields(&root);
        finish_event(Provider::Github, &root, native)
    }
}

fn native_fields(root: &Value) -> NativeFields {
    let action = text(root, "/action");
    let (kind, item) = if let Some(issue) = root.get("issue") {
        ("issues", issue)
    } else if let Some(pr) = root.get("pull_request") {
        ("pull_request", pr)
    } else {
        return NativeFields {
            event_type: action,
            ..Default::default()
        };
    };

    let event_type = Some(match &action {
        Some(a) => format!("{kind}.{a}"),
        None => kind.to_string(),
    });

    let external_id = text(item, "/number").map(|n| format!("gh-{n}"));

    // Only closing and reopening are unambiguous; an "open" issue being
    // edited says nothing about local progress.
    let merged = item.get("merged").and_then(Value::as_bool).unwrap_or(false);
    let status = if merged || text(item, "/state").as_deref() == Some("closed") {
        Some(TaskStatus::Done)
    } else if action.as_deref() == Some("reopened") {
        Some(TaskStatus::Pending)
    } else {
        None
    };

    let labels = label_names(item, "/labels");
    let title = text(item, "/title").unwrap_or_default();
    let body = text(item, "/body").unwrap_or_default();
    let task_id = find_task_marker(
        labels
            .iter()
            .map(String::as_str)
            .chain([title.as_str(), body.as_str()]),
    );

    NativeFields {
        event_type,
        external_id,
        task_id,
        status,
    }
}
