//! The watcher engine
//!
//! Lifecycle: `Initializing -> Crawling -> [ReplayingSnapshot] -> Watching -> Closed`.
//!
//! Opening an engine spawns a driver task on the current tokio runtime. The
//! driver yields once so listeners attached right after `open` see the whole
//! crawl, then crawls the root, optionally replays a snapshot, subscribes to
//! the notification source and queues `ready`. A separate flusher task hands
//! queued emissions to listeners, yielding after each [`FLUSH_BUDGET`] worth
//! of dispatching.
//!
//! Listeners run on the flusher task and must not block.

use crate::config::{Backend, WatchOptions};
use crate::crawl::Crawler;
use crate::debounce::{EventDebouncer, FLUSH_BUDGET};
use crate::error::{Result, WatchError};
use crate::event::{Event, Listener, Topic};
use crate::ignore::FilterRules;
use crate::platform::{NativeSource, NotifySource, RawEvent, SubscribeOptions};
use crate::reconcile::EventReconciler;
use crate::snapshot::SnapshotBridge;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use treespy_core::PathRegistry;

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Crawling,
    ReplayingSnapshot,
    Watching,
    Closed,
}

/// State shared by the driver, the flusher and the public handle
pub(crate) struct Shared {
    pub root: PathBuf,
    pub filters: FilterRules,
    pub registry: Mutex<PathRegistry>,
    debouncer: Mutex<EventDebouncer>,
    wake: Notify,
    listeners: RwLock<Vec<(Topic, Listener)>>,
    closing: AtomicBool,
    state: Mutex<EngineState>,
}

impl Shared {
    fn new(root: PathBuf, filters: FilterRules) -> Self {
        Self {
            root,
            filters,
            registry: Mutex::new(PathRegistry::new()),
            debouncer: Mutex::new(EventDebouncer::new()),
            wake: Notify::new(),
            listeners: RwLock::new(Vec::new()),
            closing: AtomicBool::new(false),
            state: Mutex::new(EngineState::Initializing),
        }
    }

    /// Absolute form of a relative path
    pub fn absolute(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Queue one emission
    pub fn emit(&self, event: Event) {
        if self.debouncer.lock().push(event) {
            self.wake.notify_one();
        }
    }

    /// Queue a batch of emissions under one lock
    pub fn emit_all(&self, events: Vec<Event>) {
        if self.debouncer.lock().push_all(events) {
            self.wake.notify_one();
        }
    }

    /// Surface a failure to `error` listeners right away, ahead of anything
    /// still queued
    pub fn report(&self, error: WatchError) {
        warn!("{}", error);
        if self.is_closing() {
            return;
        }
        self.dispatch(&Event::Error(Arc::new(error)));
    }

    fn dispatch(&self, event: &Event) {
        // Clone the matching listeners so none runs under the lock
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(topic, _)| topic.accepts(event))
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in targets {
            listener(event, &self.root);
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: EngineState) {
        let mut current = self.state.lock();
        debug!("Engine state {:?} -> {:?}", *current, state);
        *current = state;
    }

    fn open_gate(&self) {
        if self.debouncer.lock().finish_crawl() {
            self.wake.notify_one();
        }
    }

    /// Subscribe options carrying the current ignore list
    fn subscribe_options(&self, config: &DriverConfig) -> SubscribeOptions {
        let ignore = self
            .registry
            .lock()
            .ignored()
            .iter()
            .map(|rel| self.root.join(rel))
            .collect();

        SubscribeOptions {
            backend: config.backend,
            ignore,
            batch_window: config.batch_window,
        }
    }

    /// Reconcile one live batch, then crawl what it uncovered
    async fn process_batch(&self, batch: Vec<RawEvent>) {
        let started = Instant::now();
        let outcome = {
            let mut registry = self.registry.lock();
            EventReconciler::new(&self.root, &self.filters).process(&mut registry, &batch)
        };

        for error in outcome.errors {
            self.report(error);
        }
        self.emit_all(outcome.emissions);

        if !outcome.recrawl.is_empty() {
            let crawler = Crawler::new(self);
            futures::future::join_all(
                outcome
                    .recrawl
                    .into_iter()
                    .map(|dir| crawler.crawl_new(dir)),
            )
            .await;
        }

        trace!("Processed {} raw events in {:?}", batch.len(), started.elapsed());
    }
}

struct DriverConfig {
    backend: Backend,
    batch_window: Duration,
    snapshot: Option<SnapshotBridge>,
}

/// A running watcher over one directory tree
///
/// ```no_run
/// use treespy_watcher::{Engine, Topic, WatchOptions};
///
/// # async fn demo() -> treespy_watcher::Result<()> {
/// let engine = Engine::open("/some/project", WatchOptions::default().skip(["target/"]))?;
/// engine.on(Topic::All, |event, _root| println!("{} {:?}", event.name(), event.path()));
/// // ...
/// engine.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Engine {
    /// Start watching `root` with the platform's native notifications
    pub fn open(root: impl Into<PathBuf>, options: WatchOptions) -> Result<Self> {
        Self::with_source(root, options, Arc::new(NativeSource::new()))
    }

    /// Start watching `root` with a caller-provided notification source
    ///
    /// Must be called from within a tokio runtime. Invalid globs fail here,
    /// before any I/O.
    pub fn with_source(
        root: impl Into<PathBuf>,
        options: WatchOptions,
        source: Arc<dyn NotifySource>,
    ) -> Result<Self> {
        let filters = FilterRules::compile(&options.filters)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let root = normalize_root(root.into());
        info!(
            "Watching {} ({} filter lists)",
            root.display(),
            filters.active_lists()
        );

        let config = DriverConfig {
            backend: options.backend,
            batch_window: options.batch_window(),
            snapshot: options.snapshot_path.clone().map(SnapshotBridge::new),
        };

        let shared = Arc::new(Shared::new(root, filters));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let driver = runtime.spawn(drive(shared.clone(), source, config, shutdown_rx));

        Ok(Self {
            shared,
            shutdown,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Attach a listener; chainable
    pub fn on<F>(&self, topic: Topic, listener: F) -> &Self
    where
        F: Fn(&Event, &Path) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .write()
            .push((topic, Arc::new(listener)));
        self
    }

    /// The watched root, as resolved at open
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// Every tracked path (files and directories) in tree order
    pub fn files(&self) -> Vec<String> {
        self.shared.registry.lock().files().to_vec()
    }

    /// Tracked directories
    pub fn dirs(&self) -> BTreeSet<String> {
        self.shared.registry.lock().dirs().iter().cloned().collect()
    }

    /// Paths excluded by the filters or by access failures, in tree order
    pub fn ignored(&self) -> Vec<String> {
        self.shared.registry.lock().ignored().to_vec()
    }

    /// Tracked descendants of `dir`; `""` lists everything
    pub fn list(&self, dir: &str) -> Vec<String> {
        self.shared.registry.lock().list(dir).to_vec()
    }

    /// Stop watching
    ///
    /// Waits for an in-flight crawl, unsubscribes, and writes the resume
    /// token when one is configured. Nothing is emitted once this is called.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let driver = self.driver.lock().take();
        match driver {
            Some(handle) => handle
                .await
                .map_err(|e| WatchError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.shared.root)
            .field("state", &self.state())
            .finish()
    }
}

fn normalize_root(root: PathBuf) -> PathBuf {
    let absolute = if root.is_absolute() {
        root
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(root),
            Err(_) => root,
        }
    };
    // Notification backends report resolved paths
    std::fs::canonicalize(&absolute).unwrap_or_else(|_| absolute.components().collect())
}

async fn drive(
    shared: Arc<Shared>,
    source: Arc<dyn NotifySource>,
    config: DriverConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    // Let the caller attach listeners first
    tokio::task::yield_now().await;

    let flusher = tokio::spawn(flush(shared.clone()));
    let result = run(&shared, source.as_ref(), &config, &mut shutdown).await;

    shared.set_state(EngineState::Closed);
    shared.closing.store(true, Ordering::SeqCst);
    shared.wake.notify_one();
    if let Err(e) = flusher.await {
        warn!("Flusher task failed: {}", e);
    }

    info!("Closed {}", shared.root.display());
    result
}

async fn run(
    shared: &Shared,
    source: &dyn NotifySource,
    config: &DriverConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    shared.set_state(EngineState::Crawling);
    let started = Instant::now();
    Crawler::new(shared).crawl(String::new()).await;
    {
        let registry = shared.registry.lock();
        info!(
            "Crawled {} in {:?}: {} paths, {} directories, {} ignored",
            shared.root.display(),
            started.elapsed(),
            registry.len(),
            registry.dirs().len(),
            registry.ignored().len()
        );
    }

    if shared.is_closing() {
        return Ok(());
    }

    if let Some(bridge) = &config.snapshot {
        shared.set_state(EngineState::ReplayingSnapshot);
        let options = shared.subscribe_options(config);
        if let Err(e) = bridge.replay(shared, source, &options).await {
            shared.report(e);
        }
        if shared.is_closing() {
            return Ok(());
        }
    }

    let options = shared.subscribe_options(config);
    let mut subscription = match source.subscribe(&shared.root, options).await {
        Ok(subscription) => subscription,
        Err(e) => {
            // No ready; the crawl results stay queryable until close
            shared.report(e);
            shared.open_gate();
            wait_for_shutdown(shutdown).await;
            return Ok(());
        }
    };

    shared.set_state(EngineState::Watching);
    shared.emit(Event::Ready);
    shared.open_gate();
    info!("Ready: {}", shared.root.display());

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            batch = subscription.next_batch() => match batch {
                Some(Ok(batch)) => shared.process_batch(batch).await,
                Some(Err(e)) => shared.report(e),
                None => {
                    shared.report(WatchError::Notify("notification source stopped".to_string()));
                    wait_for_shutdown(shutdown).await;
                    break;
                }
            },
        }
    }

    subscription.unsubscribe();
    debug!("Unsubscribed from {}", shared.root.display());

    if let Some(bridge) = &config.snapshot {
        bridge
            .persist(source, &shared.root, &shared.subscribe_options(config))
            .await?;
    }
    Ok(())
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Deliver queued emissions until the engine closes
async fn flush(shared: Arc<Shared>) {
    loop {
        shared.wake.notified().await;

        let mut cycle_start = Instant::now();
        let mut delivered = 0usize;
        loop {
            if shared.is_closing() {
                shared.debouncer.lock().clear();
                return;
            }

            let next = shared.debouncer.lock().next();
            let Some(pending) = next else { break };

            trace!(
                "Dispatching {} after {:?}",
                pending.event.name(),
                pending.queued_at.elapsed()
            );
            shared.dispatch(&pending.event);
            delivered += 1;

            if cycle_start.elapsed() >= FLUSH_BUDGET {
                debug!("Flush budget spent after {} emissions, yielding", delivered);
                tokio::task::yield_now().await;
                cycle_start = Instant::now();
            }
        }

        if delivered > 0 {
            trace!("Flushed {} emissions", delivered);
        }
    }
}
