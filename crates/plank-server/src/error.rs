use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use plank_core::error::PlankError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 404 Not Found errors
// ---------------------------------------------------------------------------

/// Private sentinel error type used to carry an explicit HTTP 404 through
/// the `anyhow::Error` chain without touching the `PlankError` enum.
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 404 Not Found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    pub fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.downcast_ref::<PlankError>() {
            Some(e) => match e {
                PlankError::Signature(_) => StatusCode::UNAUTHORIZED,
                PlankError::PayloadParse(_) | PlankError::InvalidEndpoint { .. } => {
                    StatusCode::BAD_REQUEST
                }
                PlankError::UnknownProvider(_) | PlankError::EndpointNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                PlankError::EndpointExists(_) => StatusCode::CONFLICT,
                PlankError::NotInitialized
                | PlankError::Io(_)
                | PlankError::Yaml(_)
                | PlankError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "webhook request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
