//! Error types for the watcher
//!
//! Per-path failures (`Access`, `Io`) are absorbed by the engine and surfaced
//! through the `error` event; only configuration and subscription failures
//! keep the engine from reaching the watching state.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Error, Debug)]
pub enum WatchError {
    /// The options could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A filter glob failed to compile.
    #[error(transparent)]
    Filter(#[from] treespy_core::Error),

    /// Permission denied on stat or readdir.
    #[error("permission denied: '{path}'")]
    Access {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure on a watched path, e.g. a path that vanished
    /// between listing and stat.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The notification subsystem refused the subscription.
    #[error("failed to subscribe to '{root}': {reason}")]
    Subscribe { root: PathBuf, reason: String },

    /// The notification subsystem reported an error on a live subscription.
    #[error("notification error: {0}")]
    Notify(String),

    /// Reading or writing the resume token failed.
    #[error("snapshot '{path}': {reason}")]
    Snapshot { path: PathBuf, reason: String },

    /// The engine was opened outside a tokio runtime.
    #[error("no tokio runtime available to drive the watcher")]
    NoRuntime,

    /// The background driver panicked or was cancelled.
    #[error("watcher task failed: {0}")]
    Task(String),
}

impl WatchError {
    /// Classify an I/O failure on a relative path.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::Access { path, source }
        } else {
            Self::Io { path, source }
        }
    }

    /// Platform-style error code, when one applies.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Access { .. } => Some("EACCES"),
            Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => Some("ENOENT"),
            _ => None,
        }
    }

    /// Relative path the error concerns, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Access { path, .. } | Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }

    /// True for permission failures.
    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access { .. })
    }
}
