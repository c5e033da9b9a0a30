//! Typed error hierarchy for the chat relay.
//!
//! Four enums cover the four failure domains:
//! - `StoreError`: SQLite persistence failures
//! - `RelayError`: completion-service transport and API failures
//! - `ConfigError`: start-up configuration problems
//! - `ChatError`: per-request failures surfaced by the turn orchestrator

use thiserror::Error;

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to run migrations: {0}")]
    Migration(#[source] rusqlite::Error),

    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Stored turn {id} has invalid {field}: '{value}'")]
    CorruptRow {
        id: i64,
        field: &'static str,
        value: String,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Database task failed: {0}")]
    TaskFailed(String),
}

/// Errors from the completion relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Completion request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Completion service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed completion response: {0}")]
    Decode(String),

    #[error("Completion stream ended before the done marker")]
    Truncated,
}

/// Errors while resolving start-up configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value '{value}' for {key}: {message}")]
    InvalidValue {
        key: &'static str,
        value: String,
        message: String,
    },

    #[error("{0} is not set; the completion service needs a credential")]
    MissingCredential(&'static str),
}

/// Per-request errors from the turn orchestrator.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Upstream(#[from] RelayError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
