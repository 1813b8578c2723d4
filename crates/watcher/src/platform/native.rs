//! OS-backed notification source built on `notify`
//!
//! Raw notifications are forwarded from the notify callback into a
//! crossbeam channel. A forwarding thread gathers everything that arrives
//! within the batch window into one batch and hands it to the engine.
//!
//! Resume tokens are a bincode-encoded manifest of every path under the
//! root with its size and mtime. `events_since` rescans the tree and diffs
//! it against the manifest.

use super::{
    is_ignored, snapshot_error, BatchResult, NotifySource, RawEvent, RawKind, SubscribeOptions,
    Subscription,
};
use crate::config::Backend;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use treespy_core::path::{compare, relative_to};
use walkdir::WalkDir;

const MANIFEST_VERSION: u32 = 1;

/// Notification source backed by the platform's native watcher
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSource;

impl NativeSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotifySource for NativeSource {
    async fn subscribe(&self, root: &Path, options: SubscribeOptions) -> Result<Subscription> {
        let (raw_tx, raw_rx) = crossbeam_channel::unbounded();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();

        let handler = move |res: notify::Result<notify::Event>| {
            // Receiver gone means the subscription is shutting down
            let _ = raw_tx.send(res);
        };

        let subscribe_error = |e: notify::Error| WatchError::Subscribe {
            root: root.to_path_buf(),
            reason: e.to_string(),
        };

        let watcher: Box<dyn Send> = match options.backend {
            Backend::Recommended => {
                let mut watcher =
                    RecommendedWatcher::new(handler, Config::default()).map_err(subscribe_error)?;
                watcher
                    .watch(root, RecursiveMode::Recursive)
                    .map_err(subscribe_error)?;
                Box::new(watcher)
            }
            Backend::Poll { interval_ms } => {
                let config =
                    Config::default().with_poll_interval(Duration::from_millis(interval_ms));
                let mut watcher = PollWatcher::new(handler, config).map_err(subscribe_error)?;
                watcher
                    .watch(root, RecursiveMode::Recursive)
                    .map_err(subscribe_error)?;
                Box::new(watcher)
            }
        };

        let ignore = options.ignore;
        let window = options.batch_window;
        std::thread::Builder::new()
            .name("treespy-forward".to_string())
            .spawn(move || forward(raw_rx, batch_tx, ignore, window))
            .map_err(|e| WatchError::Subscribe {
                root: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!("Watching {} ({:?})", root.display(), options.backend);
        Ok(Subscription::new(batch_rx, Some(watcher)))
    }

    async fn events_since(
        &self,
        root: &Path,
        token: &Path,
        options: &SubscribeOptions,
    ) -> Result<Vec<RawEvent>> {
        let root = root.to_path_buf();
        let token = token.to_path_buf();
        let ignore = options.ignore.clone();

        tokio::task::spawn_blocking(move || replay_from_token(&root, &token, &ignore))
            .await
            .map_err(|e| WatchError::Task(e.to_string()))?
    }

    async fn write_snapshot(
        &self,
        root: &Path,
        token: &Path,
        options: &SubscribeOptions,
    ) -> Result<()> {
        let root = root.to_path_buf();
        let token = token.to_path_buf();
        let ignore = options.ignore.clone();

        tokio::task::spawn_blocking(move || write_token(&root, &token, &ignore))
            .await
            .map_err(|e| WatchError::Task(e.to_string()))?
    }
}

/// Gather raw notifications into batches until either side hangs up
fn forward(
    raw: Receiver<notify::Result<notify::Event>>,
    batches: mpsc::UnboundedSender<BatchResult>,
    ignore: Vec<PathBuf>,
    window: Duration,
) {
    while let Ok(first) = raw.recv() {
        let mut batch = Vec::new();
        let mut failures = Vec::new();
        collect(first, &mut batch, &mut failures, &ignore);

        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match raw.recv_timeout(remaining) {
                Ok(next) => collect(next, &mut batch, &mut failures, &ignore),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for failure in failures {
            if batches.send(Err(failure)).is_err() {
                return;
            }
        }
        if !batch.is_empty() {
            debug!("Forwarding batch of {} raw events", batch.len());
            if batches.send(Ok(batch)).is_err() {
                return;
            }
        }
    }
    debug!("Notification forwarder stopped");
}

fn collect(
    res: notify::Result<notify::Event>,
    batch: &mut Vec<RawEvent>,
    failures: &mut Vec<WatchError>,
    ignore: &[PathBuf],
) {
    match res {
        Ok(event) => batch.extend(
            map_event(event)
                .into_iter()
                .filter(|raw| !is_ignored(&raw.path, ignore)),
        ),
        Err(e) => failures.push(WatchError::Notify(e.to_string())),
    }
}

/// Translate a notify event into create/update/delete
fn map_event(event: notify::Event) -> Vec<RawEvent> {
    let notify::Event { kind, paths, .. } = event;

    match kind {
        EventKind::Create(_) => paths.into_iter().map(RawEvent::create).collect(),
        EventKind::Remove(_) => paths.into_iter().map(RawEvent::delete).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(RawEvent::delete).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(RawEvent::create).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(RawEvent::delete(from));
            }
            if let Some(to) = paths.next() {
                out.push(RawEvent::create(to));
            }
            out
        }
        // Rename with no direction: decide by whether the path still exists
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|p| {
                if p.symlink_metadata().is_ok() {
                    RawEvent::create(p)
                } else {
                    RawEvent::delete(p)
                }
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any => paths.into_iter().map(RawEvent::update).collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

/// Manifest persisted as the resume token
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    root: PathBuf,
    entries: BTreeMap<String, Stamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Stamp {
    is_dir: bool,
    len: u64,
    mtime_secs: u64,
    mtime_nanos: u32,
}

impl Stamp {
    fn from_metadata(meta: &Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        Self {
            is_dir: meta.is_dir(),
            len: meta.len(),
            mtime_secs: mtime.as_secs(),
            mtime_nanos: mtime.subsec_nanos(),
        }
    }
}

fn scan(root: &Path, token: &Path, ignore: &[PathBuf]) -> BTreeMap<String, Stamp> {
    WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.path() != token && !is_ignored(e.path(), ignore))
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let rel = relative_to(root, e.path())?;
            let meta = e.metadata().ok()?;
            Some((rel, Stamp::from_metadata(&meta)))
        })
        .collect()
}

fn write_token(root: &Path, token: &Path, ignore: &[PathBuf]) -> Result<()> {
    let manifest = Manifest {
        version: MANIFEST_VERSION,
        root: root.to_path_buf(),
        entries: scan(root, token, ignore),
    };
    let bytes = bincode::serialize(&manifest).map_err(|e| snapshot_error(token, e))?;

    let dir = match token.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| snapshot_error(token, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| snapshot_error(token, e))?;
    tmp.write_all(&bytes).map_err(|e| snapshot_error(token, e))?;
    tmp.as_file().sync_all().map_err(|e| snapshot_error(token, e))?;
    tmp.persist(token).map_err(|e| snapshot_error(token, e.error))?;

    debug!("Wrote snapshot of {} entries to {}", manifest.entries.len(), token.display());
    Ok(())
}

fn replay_from_token(root: &Path, token: &Path, ignore: &[PathBuf]) -> Result<Vec<RawEvent>> {
    let bytes = match std::fs::read(token) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(snapshot_error(token, e)),
    };
    let manifest: Manifest = bincode::deserialize(&bytes).map_err(|e| snapshot_error(token, e))?;

    if manifest.version != MANIFEST_VERSION || manifest.root != root {
        warn!(
            "Snapshot {} does not describe {} (v{}), ignoring it",
            token.display(),
            root.display(),
            manifest.version
        );
        return Ok(Vec::new());
    }

    let current = scan(root, token, ignore);
    Ok(diff(&manifest.entries, &current)
        .into_iter()
        .map(|(kind, rel)| RawEvent::new(kind, root.join(rel)))
        .collect())
}

/// Changes between two manifests, ordered so descendants follow their directory
fn diff(old: &BTreeMap<String, Stamp>, new: &BTreeMap<String, Stamp>) -> Vec<(RawKind, String)> {
    let mut changes: Vec<(RawKind, String)> = Vec::new();

    for (path, stamp) in new {
        match old.get(path) {
            None => changes.push((RawKind::Create, path.clone())),
            Some(previous) if previous.is_dir != stamp.is_dir => {
                changes.push((RawKind::Delete, path.clone()));
                changes.push((RawKind::Create, path.clone()));
            }
            Some(previous) if previous != stamp && !stamp.is_dir => {
                changes.push((RawKind::Update, path.clone()))
            }
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.push((RawKind::Delete, path.clone()));
        }
    }

    // Stable: a delete+create pair for the same path keeps its order
    changes.sort_by(|a, b| compare(&a.1, &b.1));
    changes
}
