pub mod error;
pub mod notify;
pub mod providers;
pub mod routes;
pub mod signature;
pub mod state;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use plank_core::processor::EventProcessor;
use plank_core::types::Provider;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::notify::Notifier;
use crate::providers::ProviderHandler;
use crate::state::{AppState, CutoffRepository, SharedRepository, DEFAULT_RECENT_CAPACITY};

pub const DEFAULT_PORT: u16 = 8787;

/// Settings fixed for the lifetime of a [`WebhookServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub secrets: HashMap<Provider, String>,
    /// Size of the `/events` ring buffer.
    pub recent_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            secrets: HashMap::new(),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Empty secrets are ignored.
    pub fn with_secret(mut self, provider: Provider, secret: Option<String>) -> Self {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.secrets.insert(provider, secret);
        }
        self
    }
}

/// Build the axum Router with all webhook routes and middleware.
/// Used by [`WebhookServer`] and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/events", get(routes::events::recent_events))
        .route("/webhooks/{provider}", post(routes::webhooks::receive))
        .layer(middleware::from_fn_with_state(
            state.cutoff.clone(),
            cut_off_at_deadline,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer 503 for any request still running when the shutdown deadline passes.
async fn cut_off_at_deadline(
    State(cutoff): State<CancellationToken>,
    req: Request,
    next: Next,
) -> Response {
    tokio::select! {
        res = next.run(req) => res,
        _ = cutoff.cancelled() => {
            tracing::warn!("shutdown deadline passed; request cut off");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "server shut down before the request finished" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Inbound webhook server.
///
/// Handlers and secrets may be changed while serving; each request sees the
/// values current when it arrives.
pub struct WebhookServer {
    config: ServerConfig,
    state: AppState,
    cancel: CancellationToken,
    force: CancellationToken,
    phase: watch::Sender<Phase>,
}

impl WebhookServer {
    pub fn new(config: ServerConfig, processor: EventProcessor<SharedRepository>) -> Self {
        let force = CancellationToken::new();
        let repo: SharedRepository = Arc::new(CutoffRepository::new(
            processor.repository().clone(),
            force.clone(),
        ));
        let state = AppState::new(Arc::new(EventProcessor::new(repo)), config.recent_capacity)
            .with_cutoff(force.clone());
        for (provider, secret) in &config.secrets {
            state.set_secret(*provider, Some(secret.clone()));
        }
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            config,
            state,
            cancel: CancellationToken::new(),
            force,
            phase,
        }
    }

    /// Publish `task.status_changed` through `notifier` whenever an inbound
    /// event changes a task's status.
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.state = self.state.with_notifier(notifier);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelled when shutdown begins. Share it with anything whose
    /// background work should stop with the server.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Route `/webhooks/<provider>` to `handler`, replacing any earlier one.
    pub fn register_handler(&self, handler: Arc<dyn ProviderHandler>) {
        self.state.register_handler(handler);
    }

    pub fn set_secret(&self, provider: Provider, secret: Option<String>) {
        self.state.set_secret(provider, secret);
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = self.config.addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
        self.serve_on(listener).await
    }

    /// Serve on a pre-bound listener.
    ///
    /// Lets the caller read the actual port before starting (useful when
    /// `port = 0` and the OS picks a free port).
    pub async fn serve_on(&self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let providers = self.state.providers();
        for provider in &providers {
            if self.state.secret(*provider).is_none() {
                tracing::warn!(
                    %provider,
                    "no secret configured; /webhooks/{provider} accepts unauthenticated requests"
                );
            }
        }
        tracing::info!(?providers, "webhook server listening on http://{addr}");

        self.phase.send_replace(Phase::Running);
        let app = self.router();
        let cancel = self.cancel.clone();
        let graceful = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
        };

        let result = tokio::select! {
            res = graceful => res.map_err(anyhow::Error::from),
            _ = self.force.cancelled() => {
                tracing::warn!("shutdown deadline passed; abandoning in-flight requests");
                Ok(())
            }
        };
        self.phase.send_replace(Phase::Stopped);
        tracing::info!("webhook server stopped");
        result
    }

    /// Stop accepting connections and wait up to `deadline` for in-flight
    /// requests to finish. Past the deadline the remaining requests are
    /// answered with 503, their state changes are not saved, and an error
    /// is returned.
    pub async fn shutdown(&self, deadline: Duration) -> anyhow::Result<()> {
        self.cancel.cancel();
        let mut phase = self.phase.subscribe();
        let drained = tokio::time::timeout(deadline, phase.wait_for(|p| *p != Phase::Running))
            .await
            .is_ok();
        if drained {
            Ok(())
        } else {
            self.force.cancel();
            anyhow::bail!("in-flight requests did not finish within {deadline:?}")
        }
    }
}
