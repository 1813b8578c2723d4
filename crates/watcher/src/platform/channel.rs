//! In-process notification source
//!
//! Batches are pushed by the caller through a [`BatchSender`]. Useful for
//! embedders that already own a notification pipeline, and for tests that
//! need deterministic batches.

use super::{BatchResult, NotifySource, RawEvent, SubscribeOptions, Subscription};
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Feeds batches into a subscribed [`ChannelSource`]
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::UnboundedSender<BatchResult>,
}

impl BatchSender {
    /// Deliver one batch; returns false once the subscription is gone
    pub fn send(&self, batch: Vec<RawEvent>) -> bool {
        self.tx.send(Ok(batch)).is_ok()
    }

    /// Deliver a source-side failure
    pub fn fail(&self, error: WatchError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    receiver: Option<mpsc::UnboundedReceiver<BatchResult>>,
    replay: Vec<RawEvent>,
    ignore_seed: Option<Vec<PathBuf>>,
}

/// Notification source driven by a [`BatchSender`]
#[derive(Debug, Clone)]
pub struct ChannelSource {
    state: Arc<Mutex<ChannelState>>,
    refuse_subscribe: Arc<AtomicBool>,
    snapshots_written: Arc<AtomicUsize>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it
    pub fn new() -> (Self, BatchSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            state: Arc::new(Mutex::new(ChannelState {
                receiver: Some(rx),
                ..Default::default()
            })),
            refuse_subscribe: Arc::new(AtomicBool::new(false)),
            snapshots_written: Arc::new(AtomicUsize::new(0)),
        };
        (source, BatchSender { tx })
    }

    /// Events returned by the next `events_since` call
    pub fn set_replay(&self, events: Vec<RawEvent>) {
        self.state.lock().replay = events;
    }

    /// Make `subscribe` fail, as an unavailable backend would
    pub fn refuse_subscribe(&self) {
        self.refuse_subscribe.store(true, Ordering::SeqCst);
    }

    /// Number of tokens written so far
    pub fn snapshots_written(&self) -> usize {
        self.snapshots_written.load(Ordering::SeqCst)
    }

    /// The ignore list passed to `subscribe`, once subscribed
    pub fn ignore_seed(&self) -> Option<Vec<PathBuf>> {
        self.state.lock().ignore_seed.clone()
    }
}

#[async_trait]
impl NotifySource for ChannelSource {
    async fn subscribe(&self, root: &Path, options: SubscribeOptions) -> Result<Subscription> {
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(WatchError::Subscribe {
                root: root.to_path_buf(),
                reason: "backend unavailable".to_string(),
            });
        }

        let mut state = self.state.lock();
        let receiver = state.receiver.take().ok_or_else(|| WatchError::Subscribe {
            root: root.to_path_buf(),
            reason: "channel source already subscribed".to_string(),
        })?;
        state.ignore_seed = Some(options.ignore);

        Ok(Subscription::new(receiver, None))
    }

    async fn events_since(
        &self,
        _root: &Path,
        _token: &Path,
        _options: &SubscribeOptions,
    ) -> Result<Vec<RawEvent>> {
        Ok(std::mem::take(&mut self.state.lock().replay))
    }

    async fn write_snapshot(
        &self,
        _root: &Path,
        _token: &Path,
        _options: &SubscribeOptions,
    ) -> Result<()> {
        self.snapshots_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
