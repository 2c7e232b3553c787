//! Error types for Parley gateway

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Parley gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Request validation error (empty message, bad model, etc)
    #[error("invalid request: {0}")]
    Validation(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Completion provider failure (transport, API status, empty reply)
    #[error("provider error: {0}")]
    Provider(String),

    /// Summarization call failed while compacting history
    #[error("summarization failed: {0}")]
    Summarization(String),

    /// No tokenizer mapping exists for the model
    #[error("unknown model for tokenization: {0}")]
    UnknownModel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the failure came from the upstream language-model API
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Summarization(_) | Self::Http(_))
    }
}
