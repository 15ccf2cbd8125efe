use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use plank_core::domain_event::{DomainEvent, TASK_STATUS_CHANGED};
use plank_core::error::PlankError;
use plank_core::inbound::InboundEvent;
use plank_core::processor::ProcessOutcome;
use plank_core::types::Provider;

use crate::error::AppError;
use crate::signature::WebhookRequest;
use crate::state::{AppState, ProcessedEvent};

/// POST /webhooks/{provider}: verify, parse and apply one tracker event.
pub async fn receive(
    State(app): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let provider: Provider = provider.parse()?;
    let handler = app
        .handler(provider)
        .ok_or_else(|| AppError::not_found(format!("no handler registered for '{provider}'")))?;

    if let Some(secret) = app.secret(provider) {
        let request = WebhookRequest::new(&body, &headers, &query);
        if !handler.verify(&secret, &request) {
            tracing::warn!(%provider, "webhook authentication failed");
            return Err(PlankError::Signature(provider).into());
        }
    }

    let event = handler.parse(&body).inspect_err(|e| {
        tracing::warn!(%provider, error = %e, "rejected webhook payload");
    })?;

    let processor = app.processor.clone();
    let inbound = event.clone();
    let outcome = tokio::task::spawn_blocking(move || processor.process_event(&inbound))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    tracing::debug!(
        %provider,
        event_type = %event.event_type,
        external_id = %event.external_id,
        ?outcome,
        "webhook processed"
    );

    app.recent.push(ProcessedEvent {
        provider,
        event_type: event.event_type.clone(),
        external_id: event.external_id.clone(),
        outcome: outcome.clone(),
        received_at: Utc::now(),
    });

    if outcome.status_changed() {
        notify_status_change(&app, &event, &outcome);
    }

    let status = match outcome {
        ProcessOutcome::Untracked => "ignored",
        ProcessOutcome::Synced { .. } => "processed",
    };
    Ok(Json(serde_json::json!({
        "status": status,
        "provider": provider,
        "event_type": event.event_type,
        "external_id": event.external_id,
        "result": outcome,
    })))
}

fn notify_status_change(app: &AppState, event: &InboundEvent, outcome: &ProcessOutcome) {
    let (Some(notifier), ProcessOutcome::Synced { task_id, status, .. }) = (&app.notifier, outcome)
    else {
        return;
    };
    // Fire-and-forget: the tracker gets its 200 regardless of delivery.
    let _handle = notifier.notify(DomainEvent::new(
        TASK_STATUS_CHANGED,
        serde_json::json!({
            "task_id": task_id,
            "status": status,
            "provider": event.provider,
            "external_id": event.external_id,
        }),
    ));
}
