//! Common utilities for engine integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod recorder;

pub use fixtures::TestTree;
pub use recorder::{Recorded, Recorder};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use treespy_watcher::{BatchSender, ChannelSource, Engine, RawEvent, WatchOptions};

/// An engine fed by a channel source, with everything it emits recorded
pub struct Harness {
    pub engine: Engine,
    pub source: ChannelSource,
    pub recorder: Recorder,
    sender: BatchSender,
    root: PathBuf,
}

impl Harness {
    /// Open an engine over `tree`
    pub fn open(tree: &TestTree, options: WatchOptions) -> Result<Self> {
        let (source, sender) = ChannelSource::new();
        Self::with_source(tree, options, source, sender)
    }

    /// Open with a pre-configured source
    pub fn with_source(
        tree: &TestTree,
        options: WatchOptions,
        source: ChannelSource,
        sender: BatchSender,
    ) -> Result<Self> {
        let engine = Engine::with_source(tree.root(), options, Arc::new(source.clone()))?;
        let recorder = Recorder::attach(&engine);
        let root = engine.root().to_path_buf();
        Ok(Self {
            engine,
            source,
            recorder,
            sender,
            root,
        })
    }

    /// Deliver one raw batch; returns false once unsubscribed
    pub fn send(&self, batch: Vec<RawEvent>) -> bool {
        self.sender.send(batch)
    }

    pub fn create(&self, rel: &str) -> RawEvent {
        RawEvent::create(self.root.join(rel))
    }

    pub fn update(&self, rel: &str) -> RawEvent {
        RawEvent::update(self.root.join(rel))
    }

    pub fn delete(&self, rel: &str) -> RawEvent {
        RawEvent::delete(self.root.join(rel))
    }

    /// Write `rel`, announce it, and wait for its create
    ///
    /// Batches are handled in order, so once this returns every emission of
    /// earlier batches has been delivered.
    pub async fn settle(&self, tree: &TestTree, rel: &str) -> Result<()> {
        tree.write(rel, "sentinel")?;
        self.send(vec![self.create(rel)]);
        self.recorder
            .wait_for(&format!("create {rel}"), |events| {
                events.iter().any(|e| e.name == "create" && e.path == rel)
            })
            .await
    }
}

/// Sorted copy, for comparing emissions whose order is not guaranteed
pub fn sorted<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut out: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    out.sort();
    out
}

/// Paths present in both `files` and `ignored`; always empty for a healthy index
pub fn overlap(files: &[String], ignored: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|path| ignored.contains(path))
        .cloned()
        .collect()
}
