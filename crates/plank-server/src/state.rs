use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use plank_core::error::{PlankError, Result};
use plank_core::processor::{EventProcessor, ProcessOutcome};
use plank_core::state::{ExecutionState, StateRepository};
use plank_core::types::Provider;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;
use crate::providers::ProviderHandler;

pub type SharedRepository = Arc<dyn StateRepository>;
pub type SharedProcessor = Arc<EventProcessor<SharedRepository>>;

/// Default capacity of the `/events` diagnostics buffer.
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// One processed inbound event, as reported by `GET /events`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEvent {
    pub provider: Provider,
    pub event_type: String,
    pub external_id: String,
    /// Carries the task id when the event was tracked.
    #[serde(flatten)]
    pub outcome: ProcessOutcome,
    pub received_at: DateTime<Utc>,
}

/// Fixed-size buffer of the most recently processed events.
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    events: Mutex<VecDeque<ProcessedEvent>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: ProcessedEvent) {
        if self.capacity == 0 {
            return;
        }
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Newest first, at most `limit` entries.
    pub fn newest(&self, limit: usize) -> Vec<ProcessedEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Repository that stops saving once `cutoff` is cancelled.
///
/// Processing runs on a blocking thread that outlives a cancelled request, so
/// the save is refused here rather than in the route.
pub struct CutoffRepository {
    inner: SharedRepository,
    cutoff: CancellationToken,
}

impl CutoffRepository {
    pub fn new(inner: SharedRepository, cutoff: CancellationToken) -> Self {
        Self { inner, cutoff }
    }
}

impl StateRepository for CutoffRepository {
    fn load(&self) -> Result<Option<ExecutionState>> {
        self.inner.load()
    }

    fn save(&self, state: &ExecutionState) -> Result<()> {
        if self.cutoff.is_cancelled() {
            return Err(PlankError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "shutdown deadline passed; state not saved",
            )));
        }
        self.inner.save(state)
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub handlers: Arc<RwLock<HashMap<Provider, Arc<dyn ProviderHandler>>>>,
    pub secrets: Arc<RwLock<HashMap<Provider, String>>>,
    pub processor: SharedProcessor,
    pub recent: Arc<RecentEvents>,
    pub notifier: Option<Arc<Notifier>>,
    /// Cancelled when the shutdown deadline passes; in-flight requests are
    /// answered with 503 from then on.
    pub cutoff: CancellationToken,
}

impl AppState {
    pub fn new(processor: SharedProcessor, recent_capacity: usize) -> Self {
        Self {
            handlers: Arc::default(),
            secrets: Arc::default(),
            processor,
            recent: Arc::new(RecentEvents::new(recent_capacity)),
            notifier: None,
            cutoff: CancellationToken::new(),
        }
    }

    pub fn with_cutoff(mut self, cutoff: CancellationToken) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn register_handler(&self, handler: Arc<dyn ProviderHandler>) {
        let provider = handler.provider();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(provider, handler).is_some() {
            tracing::debug!(%provider, "replaced webhook handler");
        }
    }

    pub fn handler(&self, provider: Provider) -> Option<Arc<dyn ProviderHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&provider).cloned()
    }

    /// Registered providers in declaration order.
    pub fn providers(&self) -> Vec<Provider> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        Provider::all()
            .iter()
            .copied()
            .filter(|p| handlers.contains_key(p))
            .collect()
    }

    /// `None` or an empty secret leaves the provider unauthenticated.
    pub fn set_secret(&self, provider: Provider, secret: Option<String>) {
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        match secret.filter(|s| !s.is_empty()) {
            Some(s) => {
                secrets.insert(provider, s);
            }
            None => {
                secrets.remove(&provider);
            }
        }
    }

    pub fn secret(&self, provider: Provider) -> Option<String> {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        secrets.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::default_handlers;
    use plank_core::state::MemoryStateRepository;
    use plank_core::types::TaskStatus;

    fn state() -> AppState {
        let repo: SharedRepository = Arc::new(MemoryStateRepository::new());
        AppState::new(Arc::new(EventProcessor::new(repo)), 3)
    }

    fn processed(id: &str) -> ProcessedEvent {
        ProcessedEvent {
            provider: Provider::Github,
            event_type: "issues.closed".into(),
            external_id: id.into(),
            outcome: ProcessOutcome::Synced {
                task_id: "t1".into(),
                status: TaskStatus::Done,
                status_changed: true,
            },
            received_at: Utc::now(),
        }
    }

    #[test]
    fn recent_events_evicts_oldest() {
        let recent = RecentEvents::new(2);
        recent.push(processed("a"));
        recent.push(processed("b"));
        recent.push(processed("c"));
        let ids: Vec<_> = recent.newest(10).into_iter().map(|e| e.external_id).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(recent.newest(1).len(), 1);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let recent = RecentEvents::new(0);
        recent.push(processed("a"));
        assert!(recent.newest(10).is_empty());
    }

    #[test]
    fn register_and_list_providers() {
        let state = state();
        assert!(state.providers().is_empty());
        for handler in default_handlers() {
            state.register_handler(handler);
        }
        assert_eq!(state.providers(), Provider::all().to_vec());
        assert!(state.handler(Provider::Jira).is_some());
    }

    #[test]
    fn empty_secret_means_open() {
        let state = state();
        state.set_secret(Provider::Github, Some("s".into()));
        assert_eq!(state.secret(Provider::Github).as_deref(), Some("s"));
        state.set_secret(Provider::Github, Some(String::new()));
        assert_eq!(state.secret(Provider::Github), None);
    }

    #[test]
    fn processed_event_serializes_outcome_inline() {
        let json = serde_json::to_value(processed("gh-1")).unwrap();
        assert_eq!(json["provider"], "github");
        assert_eq!(json["outcome"], "synced");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["status"], "done");
    }

    #[test]
    fn cutoff_repository_refuses_saves_after_cancel() {
        let inner = Arc::new(MemoryStateRepository::new());
        let cutoff = CancellationToken::new();
        let repo = CutoffRepository::new(inner, cutoff.clone());

        repo.save(&ExecutionState::new()).unwrap();
        assert!(repo.load().unwrap().is_some());

        cutoff.cancel();
        let err = repo.save(&ExecutionState::new()).unwrap_err();
        assert!(err.to_string().contains("shutdown deadline passed"));
        assert!(repo.load().unwrap().is_some());
    }
}
