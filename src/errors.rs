// src/errors.rs

//! Crate-wide error types.
//!
//! Each layer owns a narrow enum ([`CommandError`] for process execution,
//! [`StoreError`] for persistence) and [`SnapdError`] wraps them so job code
//! can use `?` across layers.

use std::time::Duration;

use thiserror::Error;

use crate::notification::NotificationError;
use crate::protocol::MetricsError;

/// Failure modes of a single external command invocation.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command '{program}' cancelled")]
    Cancelled { program: String },

    #[error("command '{program}' timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{program}' exited with code {code}: {}", .stderr.trim())]
    Exit {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("IO error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure modes of the upload store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A `running` row already exists for this node.
    #[error("upload already running for node '{node_name}'")]
    Conflict { node_name: String },

    #[error("invalid upload patch: {0}")]
    InvalidPatch(String),

    #[error("corrupt upload row: {0}")]
    Corrupt(String),

    #[error("database operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum SnapdError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("node not found in configuration: {0}")]
    NodeNotFound(String),

    #[error("upload already running for node '{0}'")]
    UploadSkipped(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnapdError {
    /// True when the store rejected a second `running` row for a node.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SnapdError::Store(StoreError::Conflict { .. }))
    }

    /// True when the failure came from cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SnapdError::Cancelled | SnapdError::Command(CommandError::Cancelled { .. })
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SnapdError>;
