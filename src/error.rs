//! Error types for the task orchestrator.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Check error: {0}")]
    Check(#[from] CheckError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition { id: i64, from: String, to: String },
}

/// Template rendering errors. Local to the task being launched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Template references unknown entry field: {field}")]
    UnknownField { field: String },

    #[error("Template syntax error: {0}")]
    Syntax(String),

    #[error("Template evaluation failed: {0}")]
    Evaluation(String),
}

/// Completion-check errors. Every variant aborts the current check pass.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Checker {} unavailable: {reason}", .path.display())]
    Unavailable { path: PathBuf, reason: String },

    #[error("Failed to run checker {}: {reason}", .path.display())]
    Spawn { path: PathBuf, reason: String },

    #[error("Checker {} broke protocol: {reason}", .path.display())]
    Protocol { path: PathBuf, reason: String },

    #[error("Checker {} timed out after {timeout:?}", .path.display())]
    Timeout { path: PathBuf, timeout: Duration },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
