use plank_core::error::Result;
use plank_core::inbound::InboundEvent;
use plank_core::types::{Provider, TaskStatus};
use serde_json::Value;

use super::{finish_event, find_task_marker, label_names, parse_json_object, text, NativeFields};
use crate::signature::{verify_hmac_sha256_hex, WebhookRequest};

pub const SIGNATURE_HEADER: &str = "linear-signature";

/// Linear issue webhooks, signed with `Linear-Signature: <hex hmac-sha256>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearHandler;

impl super::ProviderHandler for LinearHandler {
    fn provider(&self) -> Provider {
        Provider::Linear
    }

    fn verify(&self, secret: &str, request: &WebhookRequest<'_>) -> bool {
        match request.header(SIGNATURE_HEADER) {
            Some(signature) => verify_hmac_sha256_hex(secret, request.body, signature),
            None => false,
        }
    }

    fn parse(&self, body: &[u8]) -> Result<InboundEvent> {
        let root = parse_json_object(body)?;
        let native = native_fields(&root);
        finish_event(Provider::Linear, &root, native)
    }
}

fn native_fields(root: &Value) -> NativeFields {
    let action = text(root, "/action");
    let event_type = match (text(root, "/type"), action) {
        (Some(kind), Some(action)) => Some(format!("{}.{action}", kind.to_ascii_lowercase())),
        (None, Some(action)) => Some(action),
        (Some(kind), None) => Some(kind.to_ascii_lowercase()),
        (None, None) => None,
    };

    let Some(data) = root.get("data") else {
        return NativeFields {
            event_type,
            ..Default::default()
        };
    };

    let external_id = text(data, "/identifier").or_else(|| text(data, "/id"));
    // Workflow state types are stable across teams; names are not.
    let status = text(data, "/state/type")
        .as_deref()
        .and_then(TaskStatus::from_external)
        .or_else(|| {
            text(data, "/state/name")
                .as_deref()
                .and_then(TaskStatus::from_external)
        });

    let labels = label_names(data, "/labels");
    let title = text(data, "/title").unwrap_or_default();
    let description = text(data, "/description").unwrap_or_default();
    let task_id = find_task_marker(
        labels
            .iter()
            .map(String::as_str)
            .chain([title.as_str(), description.as_str()]),
    );

    NativeFields {
        event_type,
        external_id,
        task_id,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderHandler;
    use crate::signature::hmac_sha256_hex;
    use axum::http::HeaderMap;
    use std::collections::HashMap;

    fn payload(state_type: &str, state_name: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "action": "update",
            "type": "Issue",
            "data": {
                "id": "9cfb482a-81e3-4154-b5b9-2c805e70a02d",
                "identifier": "ENG-204",
                "title": "Cache warmup",
                "description": "plank-task: perf-2",
                "state": { "name": state_name, "type": state_type },
                "labels": [{ "name": "perf" }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_issue_update() {
        let event = LinearHandler.parse(&payload("completed", "Shipped")).unwrap();
        assert_eq!(event.provider, Provider::Linear);
        assert_eq!(event.event_type, "issue.update");
        assert_eq!(event.external_id, "ENG-204");
        assert_eq!(event.task_id, "perf-2");
        assert_eq!(event.status, Some(TaskStatus::Done));
    }

    #[test]
    fn state_name_used_when_type_unknown() {
        let event = LinearHandler.parse(&payload("custom", "In Progress")).unwrap();
        assert_eq!(event.status, Some(TaskStatus::InProgress));
    }

    #[test]
    fn canceled_state_leaves_status_alone() {
        let event = LinearHandler.parse(&payload("canceled", "Canceled")).unwrap();
        assert_eq!(event.status, None);
    }

    #[test]
    fn falls_back_to_uuid_when_no_identifier() {
        let body = br#"{"action":"create","type":"Issue","data":{"id":"abc-123","title":"x"}}"#;
        let event = LinearHandler.parse(body).unwrap();
        assert_eq!(event.external_id, "abc-123");
        assert_eq!(event.event_type, "issue.create");
    }

    #[test]
    fn verify_signature_header() {
        let body = payload("completed", "Done");
        let query = HashMap::new();
        let mut headers = HeaderMap::new();
        assert!(!LinearHandler.verify("k", &WebhookRequest::new(&body, &headers, &query)));

        headers.insert(SIGNATURE_HEADER, hmac_sha256_hex("k", &body).parse().unwrap());
        assert!(LinearHandler.verify("k", &WebhookRequest::new(&body, &headers, &query)));

        let tampered = payload("started", "Done");
        assert!(!LinearHandler.verify("k", &WebhookRequest::new(&tampered, &headers, &query)));
    }
}
