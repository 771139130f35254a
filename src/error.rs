use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoraError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DoraError {
    /// Transient failures are worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UpstreamUnavailable(_) => true,
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DoraError>;
