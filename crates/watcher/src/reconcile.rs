//! Live event reconciliation
//!
//! Turns one raw notification batch into registry mutations, emissions and a
//! list of directories to (re)crawl. A batch is handled in a single
//! synchronous pass; crawling happens afterwards so the next batch still sees
//! its descendant events contiguously.
//!
//! Directory renames have no event of their own. They arrive as a delete of
//! the old directory (cascading deletes for its files) plus a create of the
//! new one (re-crawled, producing creates). Pairing the two is left to
//! consumers.

use crate::error::WatchError;
use crate::event::Event;
use crate::ignore::FilterRules;
use crate::platform::{RawEvent, RawKind};
use std::fs::Metadata;
use std::path::Path;
use tracing::debug;
use treespy_core::path::{is_descendant, parent, relative_to};
use treespy_core::{PathRegistry, Removed};

/// Side effects of one batch
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Emissions in registry-mutation order
    pub emissions: Vec<Event>,

    /// Directories to crawl once the batch is applied (no entry is a
    /// descendant of another)
    pub recrawl: Vec<String>,

    /// Per-path failures to surface
    pub errors: Vec<WatchError>,
}

impl Reconciliation {
    fn queue_crawl(&mut self, dir: &str) {
        if self
            .recrawl
            .iter()
            .any(|queued| queued == dir || is_descendant(dir, queued))
        {
            return;
        }
        self.recrawl.retain(|queued| !is_descendant(queued, dir));
        self.recrawl.push(dir.to_string());
    }
}

/// Classifies raw events against the registry and filter rules
pub struct EventReconciler<'a> {
    root: &'a Path,
    filters: &'a FilterRules,
}

impl<'a> EventReconciler<'a> {
    pub fn new(root: &'a Path, filters: &'a FilterRules) -> Self {
        Self { root, filters }
    }

    /// Apply one batch to `registry`
    pub fn process(&self, registry: &mut PathRegistry, batch: &[RawEvent]) -> Reconciliation {
        let events: Vec<(RawKind, String)> = batch
            .iter()
            .filter_map(|raw| {
                let rel = relative_to(self.root, &raw.path)?;
                (!rel.is_empty()).then_some((raw.kind, rel))
            })
            .collect();

        let mut out = Reconciliation::default();
        let mut i = 0;

        while i < events.len() {
            let (kind, ref path) = events[i];
            i += 1;

            // Filtered: the whole subtree is someone else's business
            if self.filters.is_skipped(path, None) {
                match kind {
                    RawKind::Create => {
                        registry.mark_ignored(path);
                    }
                    RawKind::Delete => {
                        registry.unmark_ignored(path, true);
                    }
                    RawKind::Update => {}
                }
                skip_descendants(&events, &mut i, path);
                continue;
            }

            match kind {
                RawKind::Create => {
                    if self.create(registry, path, &mut out) {
                        skip_descendants(&events, &mut i, path);
                    }
                }
                RawKind::Update => {
                    if registry.is_dir(path) {
                        continue;
                    }
                    if registry.contains(path) {
                        match self.stat(path) {
                            Ok(stats) => out.emissions.push(Event::Update {
                                path: path.clone(),
                                stats,
                            }),
                            // Reported, but the entry stays tracked
                            Err(e) => out.errors.push(WatchError::io(path.as_str(), e)),
                        }
                    } else if !registry.is_ignored(path) {
                        // Missed creation
                        if self.create(registry, path, &mut out) {
                            skip_descendants(&events, &mut i, path);
                        }
                    }
                }
                RawKind::Delete => {
                    if registry.is_dir(path) {
                        remove_tree(registry, path, &mut out);
                        registry.unmark_ignored(path, true);
                    } else if registry.remove(path) {
                        out.emissions.push(Event::Delete { path: path.clone() });
                    } else {
                        // A previously ignored entry went away
                        registry.unmark_ignored(path, true);
                    }
                }
            }
        }

        debug!(
            "Reconciled {} raw events: {} emissions, {} crawls, {} errors",
            events.len(),
            out.emissions.len(),
            out.recrawl.len(),
            out.errors.len()
        );
        out
    }

    /// Handle a created path; returns true if its descendants' events in this
    /// batch are covered by a queued crawl
    fn create(&self, registry: &mut PathRegistry, path: &str, out: &mut Reconciliation) -> bool {
        let dir = parent(path);

        if !dir.is_empty() && !registry.is_dir(dir) {
            // Parent chain not tracked yet: crawl the highest untracked ancestor
            let mut highest = dir;
            loop {
                if self.filters.is_skipped(highest, None) {
                    return false;
                }
                let ancestor = parent(highest);
                if ancestor.is_empty() || registry.is_dir(ancestor) {
                    break;
                }
                highest = ancestor;
            }
            // Only a child event arrived for a file replaced by a directory
            if registry.contains(highest) && !registry.is_dir(highest) {
                registry.remove(highest);
                out.emissions.push(Event::Delete {
                    path: highest.to_string(),
                });
            }
            out.queue_crawl(highest);
            return false;
        }

        let stats = match self.stat(path) {
            Ok(stats) => stats,
            Err(e) => {
                let error = WatchError::io(path, e);
                if error.is_access() {
                    remove_tree(registry, path, out);
                    registry.mark_ignored(path);
                }
                out.errors.push(error);
                return false;
            }
        };

        if stats.is_dir() {
            // A file replaced by a directory
            if registry.contains(path) && !registry.is_dir(path) {
                registry.remove(path);
                out.emissions.push(Event::Delete {
                    path: path.to_string(),
                });
            }
            out.queue_crawl(path);
            return true;
        }

        // A directory replaced by a file
        if registry.is_dir(path) {
            remove_tree(registry, path, out);
        }

        if !self.filters.is_included(path, None) {
            registry.mark_ignored(path);
        } else if registry.insert(path) {
            out.emissions.push(Event::Create {
                path: path.to_string(),
                stats,
            });
        } else {
            out.emissions.push(Event::Update {
                path: path.to_string(),
                stats,
            });
        }
        false
    }

    fn stat(&self, path: &str) -> std::io::Result<Metadata> {
        std::fs::symlink_metadata(self.root.join(path))
    }
}

/// Remove a tracked block, emitting deletes for everything it held
fn remove_tree(registry: &mut PathRegistry, path: &str, out: &mut Reconciliation) {
    let removed = registry.remove_subtree(path);
    out.emissions.extend(subtree_deletes(path, removed));
}

/// Deletes for a removed block; a directory's own entry gets none
pub(crate) fn subtree_deletes(
    path: &str,
    removed: Vec<Removed>,
) -> impl Iterator<Item = Event> + '_ {
    removed
        .into_iter()
        .filter(move |entry| !(entry.was_dir && entry.path == path))
        .map(|entry| Event::Delete { path: entry.path })
}

/// Advance past the events that sit beneath `dir`
fn skip_descendants(events: &[(RawKind, String)], i: &mut usize, dir: &str) {
    while *i < events.len() && is_descendant(&events[*i].1, dir) {
        *i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore::FilterConfig;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        registry: PathRegistry,
        filters: FilterRules,
    }

    impl Fixture {
        fn new(only: &[&str], skip: &[&str]) -> Self {
            let filters = FilterRules::compile(&FilterConfig {
                only: only.iter().map(|s| s.to_string()).collect(),
                skip: skip.iter().map(|s| s.to_string()).collect(),
            })
            .unwrap();
            Self {
                dir: TempDir::new().unwrap(),
                registry: PathRegistry::new(),
                filters,
            }
        }

        fn mkdir(&mut self, path: &str, track: bool) {
            fs::create_dir_all(self.dir.path().join(path)).unwrap();
            if track {
                self.registry.insert_dir(path);
            }
        }

        fn touch(&mut self, path: &str, track: bool) {
            fs::write(self.dir.path().join(path), b"").unwrap();
            if track {
                self.registry.insert(path);
            }
        }

        fn abs(&self, path: &str) -> std::path::PathBuf {
            self.dir.path().join(path)
        }

        fn process(&mut self, batch: Vec<RawEvent>) -> Reconciliation {
            let root = self.dir.path().to_path_buf();
            EventReconciler::new(&root, &self.filters).process(&mut self.registry, &batch)
        }
    }

    fn names(out: &Reconciliation) -> Vec<(&'static str, String)> {
        out.emissions
            .iter()
            .map(|e| (e.name(), e.path().unwrap_or("").to_string()))
            .collect()
    }

    #[test]
    fn test_filtered_create_skips_descendants() {
        let mut fx = Fixture::new(&[], &["node_modules"]);
        fx.mkdir("node_modules/pkg", false);
        fx.touch("node_modules/pkg/index.js", false);

        let out = fx.process(vec![
            RawEvent::create(fx.abs("node_modules")),
            RawEvent::create(fx.abs("node_modules/pkg")),
            RawEvent::create(fx.abs("node_modules/pkg/index.js")),
        ]);

        assert!(out.emissions.is_empty());
        assert!(out.recrawl.is_empty());
        assert_eq!(fx.registry.ignored(), &["node_modules"]);
    }

    #[test]
    fn test_filtered_delete_clears_ignored_subtree() {
        let mut fx = Fixture::new(&[], &["*.log"]);
        fx.registry.mark_ignored("a.log");
        let out = fx.process(vec![RawEvent::delete(fx.abs("a.log"))]);
        assert!(out.emissions.is_empty());
        assert!(fx.registry.ignored().is_empty());
    }

    #[test]
    fn test_new_directory_is_queued_and_children_skipped() {
        let mut fx = Fixture::new(&[], &[]);
        fx.mkdir("test", false);
        fx.touch("test/a", false);

        let out = fx.process(vec![
            RawEvent::create(fx.abs("test")),
            RawEvent::create(fx.abs("test/a")),
        ]);

        assert!(out.emissions.is_empty());
        assert_eq!(out.recrawl, vec!["test"]);
    }

    #[test]
    fn test_new_file_in_tracked_dir() {
        let mut fx = Fixture::new(&["*.ts"], &[]);
        fx.mkdir("src", true);
        fx.touch("src/a.ts", false);
        fx.touch("src/b.js", false);

        let out = fx.process(vec![
            RawEvent::create(fx.abs("src/a.ts")),
            RawEvent::create(fx.abs("src/b.js")),
        ]);

        assert_eq!(names(&out), vec![("create", "src/a.ts".to_string())]);
        assert!(fx.registry.contains("src/a.ts"));
        assert_eq!(fx.registry.ignored(), &["src/b.js"]);
    }

    #[test]
    fn test_untracked_ancestor_queues_highest_untracked_dir() {
        let mut fx = Fixture::new(&[], &[]);
        fx.mkdir("tracked", true);
        fx.mkdir("tracked/x/y/z", false);
        fx.touch("tracked/x/y/z/leaf.txt", false);

        let out = fx.process(vec![RawEvent::create(fx.abs("tracked/x/y/z/leaf.txt"))]);

        assert!(out.emissions.is_empty());
        assert_eq!(out.recrawl, vec!["tracked/x"]);
    }

    #[test]
    fn test_untracked_ancestor_under_skipped_dir_is_dropped() {
        let mut fx = Fixture::new(&[], &["bar"]);
        fx.mkdir("foo", true);
        fx.mkdir("foo/bar", false);
        fx.touch("foo/bar/a", false);

        let out = fx.process(vec![RawEvent::create(fx.abs("foo/bar/a"))]);
        assert!(out.emissions.is_empty());
        assert!(out.recrawl.is_empty());
    }

    #[test]
    fn test_directory_delete_cascades_to_descendants() {
        let mut fx = Fixture::new(&[], &[]);
        fx.registry.insert_dir("test");
        fx.registry.insert("test/a");
        fx.registry.insert("test/b");
        fx.registry.insert_dir("test/sub");
        fx.registry.insert("test/sub/c");
        fx.registry.insert("test2");

        let out = fx.process(vec![
            RawEvent::delete(fx.abs("test")),
            RawEvent::delete(fx.abs("test/a")),
            RawEvent::delete(fx.abs("test/b")),
        ]);

        assert_eq!(
            names(&out),
            vec![
                ("delete", "test/a".to_string()),
                ("delete", "test/b".to_string()),
                ("delete", "test/sub".to_string()),
                ("delete", "test/sub/c".to_string()),
            ]
        );
        assert_eq!(fx.registry.files(), &["test2"]);
        assert!(!fx.registry.is_dir("test"));
        assert!(!fx.registry.is_dir("test/sub"));
    }

    #[test]
    fn test_file_replaced_by_directory_seen_through_child() {
        let mut fx = Fixture::new(&[], &[]);
        fx.registry.insert("x");
        fx.mkdir("x", false);
        fx.touch("x/y", false);

        let out = fx.process(vec![RawEvent::create(fx.abs("x/y"))]);

        assert_eq!(names(&out), vec![("delete", "x".to_string())]);
        assert_eq!(out.recrawl, vec!["x"]);
        assert!(!fx.registry.contains("x"));
    }

    #[test]
    fn test_directory_replaced_by_file() {
        let mut fx = Fixture::new(&[], &[]);
        fx.registry.insert_dir("d");
        fx.registry.insert("d/a");
        fx.touch("d", false);

        let out = fx.process(vec![RawEvent::create(fx.abs("d"))]);

        assert_eq!(
            names(&out),
            vec![("delete", "d/a".to_string()), ("create", "d".to_string())]
        );
        assert!(!fx.registry.is_dir("d"));
        assert_eq!(fx.registry.files(), &["d"]);
    }

    #[test]
    fn test_delete_then_create_same_file() {
        let mut fx = Fixture::new(&[], &[]);
        fx.touch("f.txt", true);

        let out = fx.process(vec![
            RawEvent::delete(fx.abs("f.txt")),
            RawEvent::create(fx.abs("f.txt")),
        ]);

        assert_eq!(
            names(&out),
            vec![("delete", "f.txt".to_string()), ("create", "f.txt".to_string())]
        );
        assert!(fx.registry.contains("f.txt"));
    }

    #[test]
    fn test_update_of_tracked_file() {
        let mut fx = Fixture::new(&[], &[]);
        fx.touch("f.txt", true);
        let out = fx.process(vec![RawEvent::update(fx.abs("f.txt"))]);
        assert_eq!(names(&out), vec![("update", "f.txt".to_string())]);
    }

    #[test]
    fn test_update_stat_failure_keeps_entry() {
        let mut fx = Fixture::new(&[], &[]);
        fx.registry.insert("vanished.txt");

        let out = fx.process(vec![RawEvent::update(fx.abs("vanished.txt"))]);

        assert!(out.emissions.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].code(), Some("ENOENT"));
        assert!(fx.registry.contains("vanished.txt"));
    }

    #[test]
    fn test_create_of_tracked_file_is_update() {
        let mut fx = Fixture::new(&[], &[]);
        fx.touch("f.txt", true);
        let out = fx.process(vec![RawEvent::create(fx.abs("f.txt"))]);
        assert_eq!(names(&out), vec![("update", "f.txt".to_string())]);
    }

    #[test]
    fn test_events_outside_root_are_dropped() {
        let mut fx = Fixture::new(&[], &[]);
        let out = fx.process(vec![
            RawEvent::create("/definitely/not/under/root"),
            RawEvent::update(fx.dir.path()),
        ]);
        assert!(out.emissions.is_empty());
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_queue_crawl_keeps_outermost() {
        let mut out = Reconciliation::default();
        out.queue_crawl("a/b");
        out.queue_crawl("a/b/c");
        out.queue_crawl("x");
        out.queue_crawl("a");
        assert_eq!(out.recrawl, vec!["x", "a"]);
    }
}
