//! Outbound notifier.
//!
//! Fans a [`DomainEvent`] out to every enabled endpoint whose filters match.
//! Each endpoint gets its own task, its own retry loop and its own dead
//! letter, so a slow or dead endpoint never holds up the others. Delivery is
//! at-least-once: receivers should de-duplicate on the `X-Plank-Delivery`
//! header or the event `id`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plank_core::config::{Config, OutboundEndpoint};
use plank_core::dead_letter::{DeadLetterEntry, DeadLetterSink};
use plank_core::domain_event::DomainEvent;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::signature::hmac_sha256_hex;

pub const SIGNATURE_HEADER: &str = "x-plank-signature";
pub const EVENT_HEADER: &str = "x-plank-event";
pub const DELIVERY_HEADER: &str = "x-plank-delivery";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Caps the exponent so a misconfigured retry budget cannot overflow the delay.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("delivery cancelled")]
    Cancelled,
}

/// Outcome of delivering one event to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub endpoint: String,
    pub delivered: bool,
    pub attempts: u32,
    pub dead_lettered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Completion handle for one [`Notifier::notify`] call.
///
/// Dropping it leaves the deliveries running in the background.
#[derive(Debug)]
pub struct DeliveryHandle {
    tasks: Vec<JoinHandle<DeliveryReport>>,
}

impl DeliveryHandle {
    /// Number of endpoints the event was dispatched to.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every endpoint to finish, successfully or not.
    pub async fn wait(self) -> Vec<DeliveryReport> {
        let results = futures::future::join_all(self.tasks).await;
        results
            .into_iter()
            .filter_map(|r| match r {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, "delivery task failed to complete");
                    None
                }
            })
            .collect()
    }
}

pub struct Notifier {
    endpoints: Vec<OutboundEndpoint>,
    client: reqwest::Client,
    dead_letters: Arc<dyn DeadLetterSink>,
    cancel: CancellationToken,
}

impl Notifier {
    pub fn new(
        endpoints: Vec<OutboundEndpoint>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("plank-webhooks/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(DeliveryError::Client)?;
        Ok(Self {
            endpoints,
            client,
            dead_letters,
            cancel: CancellationToken::new(),
        })
    }

    pub fn from_config(
        config: &Config,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, DeliveryError> {
        Self::new(config.webhooks.endpoints.clone(), dead_letters)
    }

    /// Stop retry loops when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn endpoints(&self) -> &[OutboundEndpoint] {
        &self.endpoints
    }

    /// Dispatch `event` to every matching endpoint and return immediately.
    ///
    /// Never fails: per-endpoint errors are retried and finally dead-lettered.
    /// Must be called from within a Tokio runtime.
    pub fn notify(&self, event: DomainEvent) -> DeliveryHandle {
        let payload = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "failed to serialize event");
                return DeliveryHandle { tasks: Vec::new() };
            }
        };
        let body = Arc::new(payload.to_string().into_bytes());
        let payload = Arc::new(payload);

        let tasks: Vec<_> = self
            .endpoints
            .iter()
            .filter(|ep| ep.enabled && ep.matches(&event.event_type))
            .map(|ep| {
                let delivery = Delivery {
                    endpoint: ep.clone(),
                    client: self.client.clone(),
                    event_id: event.id.to_string(),
                    event_type: event.event_type.clone(),
                    body: Arc::clone(&body),
                    payload: Arc::clone(&payload),
                    dead_letters: Arc::clone(&self.dead_letters),
                    cancel: self.cancel.clone(),
                };
                tokio::spawn(delivery.run())
            })
            .collect();

        if tasks.is_empty() {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no endpoints match event"
            );
        } else {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                endpoint_count = tasks.len(),
                "dispatching event to endpoints"
            );
        }

        DeliveryHandle { tasks }
    }
}

/// Delay before attempt `attempt` (1-based retries): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}

// ---------------------------------------------------------------------------
// Per-endpoint delivery
// ---------------------------------------------------------------------------

struct Delivery {
    endpoint: OutboundEndpoint,
    client: reqwest::Client,
    event_id: String,
    event_type: String,
    body: Arc<Vec<u8>>,
    payload: Arc<serde_json::Value>,
    dead_letters: Arc<dyn DeadLetterSink>,
    cancel: CancellationToken,
}

impl Delivery {
    async fn run(self) -> DeliveryReport {
        let budget = self.endpoint.attempt_budget();
        let first_attempt_at = Utc::now();
        let mut last_attempt_at = first_attempt_at;
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..budget {
            if attempt > 0 {
                let delay = backoff_delay(self.endpoint.retry_delay(), attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => return self.cancelled(attempts, last_error),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            attempts += 1;
            last_attempt_at = Utc::now();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(DeliveryError::Cancelled),
                res = self.attempt() => res,
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        endpoint = %self.endpoint.name,
                        event_id = %self.event_id,
                        attempts,
                        "event delivered"
                    );
                    return DeliveryReport {
                        endpoint: self.endpoint.name.clone(),
                        delivered: true,
                        attempts,
                        dead_lettered: false,
                        last_error: None,
                    };
                }
                Err(DeliveryError::Cancelled) => {
                    return self.cancelled(attempts, last_error);
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint.name,
                        event_id = %self.event_id,
                        attempt = attempts,
                        max_attempts = budget,
                        error = %e,
                        "delivery attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        let reason = last_error
            .clone()
            .unwrap_or_else(|| "delivery failed".to_string());
        let dead_lettered = self
            .dead_letter(reason, attempts, first_attempt_at, last_attempt_at)
            .await;

        DeliveryReport {
            endpoint: self.endpoint.name.clone(),
            delivered: false,
            attempts,
            dead_lettered,
            last_error,
        }
    }

    async fn attempt(&self) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&self.endpoint.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, &self.event_type)
            .header(DELIVERY_HEADER, &self.event_id);
        if let Some(secret) = &self.endpoint.secret {
            let signature = format!("sha256={}", hmac_sha256_hex(secret, &self.body));
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(self.body.as_ref().clone()).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }

    /// Sinks write synchronously, so the append runs on the blocking pool.
    async fn dead_letter(
        &self,
        reason: String,
        attempts: u32,
        first_attempt_at: DateTime<Utc>,
        last_attempt_at: DateTime<Utc>,
    ) -> bool {
        let entry = DeadLetterEntry {
            endpoint_name: self.endpoint.name.clone(),
            event_payload: self.payload.as_ref().clone(),
            failure_reason: reason.clone(),
            attempt_count: attempts,
            first_attempt_at,
            last_attempt_at,
        };
        let sink = Arc::clone(&self.dead_letters);
        let written = tokio::task::spawn_blocking(move || sink.append(&entry))
            .await
            .map_err(|e| format!("task join error: {e}"))
            .and_then(|res| res.map_err(|e| e.to_string()));

        match written {
            Ok(()) => {
                tracing::error!(
                    endpoint = %self.endpoint.name,
                    event_id = %self.event_id,
                    attempts,
                    %reason,
                    "delivery exhausted retries; dead-lettered"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    endpoint = %self.endpoint.name,
                    event_id = %self.event_id,
                    error = %e,
                    "failed to record dead letter"
                );
                false
            }
        }
    }

    fn cancelled(&self, attempts: u32, last_error: Option<String>) -> DeliveryReport {
        tracing::warn!(
            endpoint = %self.endpoint.name,
            event_id = %self.event_id,
            attempts,
            "delivery cancelled before completion"
        );
        DeliveryReport {
            endpoint: self.endpoint.name.clone(),
            delivered: false,
            attempts,
            dead_lettered: false,
            last_error: last_error.or_else(|| Some(DeliveryError::Cancelled.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
