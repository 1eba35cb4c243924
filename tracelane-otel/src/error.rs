use reqwest::StatusCode;
use thiserror::Error;
use tracelane_core::CoreError;

#[derive(Debug, Error)]
pub enum TracelaneError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http error: {status}")]
    Http { status: StatusCode, body: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export transport failed: {0}")]
    Transport(#[from] TracelaneError),
    #[error("processor has been shut down")]
    Shutdown,
}

/// Error type returned by caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
