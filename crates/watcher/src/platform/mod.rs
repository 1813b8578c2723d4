//! Notification sources
//!
//! The engine never talks to the OS directly. A [`NotifySource`] delivers
//! batches of raw `(kind, absolute path)` events for a subscribed tree and,
//! optionally, persists and replays resume tokens.
//!
//! Batch contract: within one batch, events for a directory's descendants
//! come right after the directory's own event.

pub mod channel;
pub mod native;

pub use channel::{BatchSender, ChannelSource};
pub use native::NativeSource;

use crate::config::Backend;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Raw change kind as reported by the notification source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawKind {
    Create,
    Update,
    Delete,
}

/// One raw notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub path: PathBuf,
}

impl RawEvent {
    pub fn new(kind: RawKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(RawKind::Create, path)
    }

    pub fn update(path: impl Into<PathBuf>) -> Self {
        Self::new(RawKind::Update, path)
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(RawKind::Delete, path)
    }
}

/// A delivered batch, or a failure reported by the source
pub type BatchResult = Result<Vec<RawEvent>>;

/// Options handed to the source on subscribe / snapshot calls
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub backend: Backend,
    /// Absolute paths whose events (and descendants' events) are not wanted
    pub ignore: Vec<PathBuf>,
    /// How long raw notifications are gathered into one batch
    pub batch_window: Duration,
}

/// The external change-notification subsystem
#[async_trait]
pub trait NotifySource: Send + Sync {
    /// Start delivering batches for `root`
    async fn subscribe(&self, root: &Path, options: SubscribeOptions) -> Result<Subscription>;

    /// Events that happened under `root` since `token` was written
    async fn events_since(
        &self,
        root: &Path,
        token: &Path,
        options: &SubscribeOptions,
    ) -> Result<Vec<RawEvent>>;

    /// Write a token describing the current state of `root`
    async fn write_snapshot(&self, root: &Path, token: &Path, options: &SubscribeOptions)
        -> Result<()>;
}

/// Live subscription handle
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) stops delivery.
pub struct Subscription {
    batches: mpsc::UnboundedReceiver<BatchResult>,
    guard: Option<Box<dyn Send>>,
}

impl Subscription {
    /// Wrap a batch receiver; `guard` is dropped on unsubscribe
    pub fn new(
        batches: mpsc::UnboundedReceiver<BatchResult>,
        guard: Option<Box<dyn Send>>,
    ) -> Self {
        Self { batches, guard }
    }

    /// Next batch; `None` once the source has shut down
    pub async fn next_batch(&mut self) -> Option<BatchResult> {
        self.batches.recv().await
    }

    /// Stop delivery and release the source's resources
    pub fn unsubscribe(mut self) {
        self.batches.close();
        self.guard.take();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// True if `path` is one of `ignore` or lies beneath one
pub(crate) fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    ignore.iter().any(|ignored| path.starts_with(ignored))
}

pub(crate) fn snapshot_error(path: &Path, reason: impl ToString) -> WatchError {
    WatchError::Snapshot {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
