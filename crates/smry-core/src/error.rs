//! Error types for smry-core

use thiserror::Error;
use uuid::Uuid;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source data unavailable: {0}")]
    InputUnavailable(String),

    #[error("Summary generation failed: {0}")]
    GenerationFailed(String),

    #[error("Hierarchy cycle detected: {0}")]
    CycleDetected(String),

    #[error("Relationship {parent} -> {child} already exists")]
    DuplicateEdge { parent: Uuid, child: Uuid },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
