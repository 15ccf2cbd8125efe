use axum::extract::{Query, State};
use axum::Json;

use crate::state::{AppState, ProcessedEvent};

#[derive(Debug, serde::Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /events: most recently processed webhooks, newest first.
pub async fn recent_events(
    State(app): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<ProcessedEvent>> {
    let limit = query
        .limit
        .unwrap_or(app.recent.capacity())
        .min(app.recent.capacity());
    Json(app.recent.newest(limit))
}
