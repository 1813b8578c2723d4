//! Resume-token handling
//!
//! When a snapshot path is configured, the engine asks the notification
//! source for everything that changed since the token was written and runs
//! it through reconciliation, then writes a fresh token on close.
//!
//! Replay runs on a scratch copy of the registry. The crawl that precedes it
//! already reflects the tree on disk, so the pass only reports what moved
//! while nobody was watching; its emissions are not delivered.

use crate::engine::Shared;
use crate::error::Result;
use crate::platform::{NotifySource, SubscribeOptions};
use crate::reconcile::EventReconciler;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a replay pass saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub changes: usize,
    pub crawls: usize,
    pub errors: usize,
}

/// Reads and writes the token at one location
#[derive(Debug, Clone)]
pub struct SnapshotBridge {
    token: PathBuf,
}

impl SnapshotBridge {
    pub fn new(token: PathBuf) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &Path {
        &self.token
    }

    /// Replay changes since the token; nothing to do if it does not exist yet
    pub(crate) async fn replay(
        &self,
        shared: &Shared,
        source: &dyn NotifySource,
        options: &SubscribeOptions,
    ) -> Result<ReplaySummary> {
        if tokio::fs::metadata(&self.token).await.is_err() {
            debug!("No snapshot at {}, skipping replay", self.token.display());
            return Ok(ReplaySummary::default());
        }

        let events = source
            .events_since(&shared.root, &self.token, options)
            .await?;

        let mut scratch = shared.registry.lock().clone();
        let outcome =
            EventReconciler::new(&shared.root, &shared.filters).process(&mut scratch, &events);

        let summary = ReplaySummary {
            events: events.len(),
            changes: outcome.emissions.len(),
            crawls: outcome.recrawl.len(),
            errors: outcome.errors.len(),
        };
        info!(
            "Replayed {} events since {}: {} changes, {} new directories, {} errors",
            summary.events,
            self.token.display(),
            summary.changes,
            summary.crawls,
            summary.errors
        );
        Ok(summary)
    }

    /// Write a token for the current state of `root`
    pub async fn persist(
        &self,
        source: &dyn NotifySource,
        root: &Path,
        options: &SubscribeOptions,
    ) -> Result<()> {
        if let Some(dir) = self.token.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                return Err(crate::platform::snapshot_error(&self.token, e));
            }
        }

        source.write_snapshot(root, &self.token, options).await?;
        info!("Wrote snapshot {}", self.token.display());
        Ok(())
    }
}
