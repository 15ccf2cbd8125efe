use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /health: liveness probe listing the providers that accept webhooks.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "providers": app.providers(),
    }))
}
