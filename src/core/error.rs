//! Error types for cellbatch

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("World reference is stale: {0}")]
    StaleWorld(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Owner unavailable: {0}")]
    OwnerUnavailable(String),

    #[error("Unsupported on this host: {0}")]
    Unsupported(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
