use crate::types::Provider;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlankError {
    #[error("not initialized: run 'plank webhook endpoint add' or create .plank/config.yaml")]
    NotInitialized,

    #[error("signature verification failed for {0} webhook")]
    Signature(Provider),

    #[error("invalid webhook payload: {0}")]
    PayloadParse(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("endpoint already exists: {0}")]
    EndpointExists(String),

    #[error("invalid endpoint '{name}': {reason}")]
    InvalidEndpoint { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PlankError {
    /// True for failures of the backing store rather than of the request.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Yaml(_) | Self::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, PlankError>;
