//! Recursive directory crawl
//!
//! Populates the registry for a directory subtree, queueing a `create` for
//! every newly tracked file and a `crawl` once a directory's children have all
//! settled. Children are visited concurrently up to [`CRAWL_FANOUT`].

use crate::engine::Shared;
use crate::error::WatchError;
use crate::event::Event;
use crate::reconcile::subtree_deletes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::io;
use std::path::Path;
use tracing::{debug, trace, warn};
use treespy_core::path::join;

/// Maximum number of children of one directory visited at once
pub const CRAWL_FANOUT: usize = 32;

pub(crate) struct Crawler<'a> {
    shared: &'a Shared,
}

impl<'a> Crawler<'a> {
    pub fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    /// Register a directory found by a live event, then crawl it
    pub async fn crawl_new(&self, dir: String) {
        self.shared.registry.lock().insert_dir(&dir);
        self.crawl(dir).await;
    }

    /// Crawl an already-registered directory (`""` is the root)
    pub fn crawl(&self, dir: String) -> BoxFuture<'_, ()> {
        async move {
            let names = match read_children(&self.shared.absolute(&dir)).await {
                Ok(names) => names,
                Err(e) => {
                    self.fail_dir(&dir, e);
                    return;
                }
            };

            let mut candidates = Vec::with_capacity(names.len());
            {
                let mut registry = self.shared.registry.lock();
                for name in names {
                    let path = join(&dir, &name);
                    if self.shared.filters.is_skipped(&path, Some(&name)) {
                        registry.mark_ignored(&path);
                    } else {
                        candidates.push((path, name));
                    }
                }
            }

            trace!("Crawling {} children of '{}'", candidates.len(), dir);
            stream::iter(candidates)
                .for_each_concurrent(CRAWL_FANOUT, |(path, name)| self.visit(path, name))
                .await;

            debug!("Crawled '{}'", dir);
            self.shared.emit(Event::Crawl { dir });
        }
        .boxed()
    }

    async fn visit(&self, path: String, name: String) {
        let stats = match tokio::fs::symlink_metadata(self.shared.absolute(&path)).await {
            Ok(stats) => stats,
            Err(e) => {
                let error = WatchError::io(path.as_str(), e);
                if error.is_access() {
                    // Whatever was tracked here is no longer reachable
                    let removed = {
                        let mut registry = self.shared.registry.lock();
                        let removed = registry.remove_subtree(&path);
                        registry.mark_ignored(&path);
                        removed
                    };
                    let deletes: Vec<Event> = subtree_deletes(&path, removed).collect();
                    if !deletes.is_empty() {
                        self.shared.emit_all(deletes);
                    }
                }
                self.shared.report(error);
                return;
            }
        };

        if stats.is_dir() {
            self.shared.registry.lock().insert_dir(&path);
            self.crawl(path).await;
            return;
        }

        let created = {
            let mut registry = self.shared.registry.lock();
            if self.shared.filters.is_included(&path, Some(&name)) {
                registry.insert(&path)
            } else {
                registry.mark_ignored(&path);
                false
            }
        };
        if created {
            self.shared.emit(Event::Create { path, stats });
        }
    }

    /// A directory could not be listed: drop what we knew of it
    fn fail_dir(&self, dir: &str, e: io::Error) {
        let error = WatchError::io(dir, e);
        let removed = {
            let mut registry = self.shared.registry.lock();
            let removed = registry.remove_subtree(dir);
            if error.is_access() && !dir.is_empty() {
                registry.mark_ignored(dir);
            }
            removed
        };

        let deletes: Vec<Event> = subtree_deletes(dir, removed).collect();
        if !deletes.is_empty() {
            self.shared.emit_all(deletes);
        }
        self.shared.report(error);
    }
}

async fn read_children(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!("Skipping non UTF-8 entry {:?} in {}", raw, dir.display()),
        }
    }
    Ok(names)
}
