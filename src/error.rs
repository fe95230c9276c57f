//! Error types for auto-attach.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Materialize error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Cannot resolve directory: {0}")]
    MissingDirectory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem-watch errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Cannot watch {path}: {reason}")]
    StartFailed { path: PathBuf, reason: String },

    #[error("Watch backend error: {0}")]
    Backend(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unique-copy materializer errors.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("File not found: {0}")]
    SourceMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail-composer dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("File not found: {0}")]
    FileMissing(PathBuf),

    #[error("Composer {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Composer {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Failed to launch composer {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

/// Inbound trigger-surface errors (HTTP endpoint, native messaging host).
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Missing filePath in request")]
    MissingFilePath,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
