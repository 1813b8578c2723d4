//! Sorted path registry
//!
//! Holds every path under watch in one sorted list, the subset of those
//! that are directories, and a second sorted list of ignored paths.
//! Because [`compare`] keeps a directory and its descendants adjacent,
//! removing a whole subtree is one binary search plus one drain.

use crate::path::{compare, is_descendant};
use ahash::AHashSet;

/// A path taken out of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub path: String,
    pub was_dir: bool,
}

/// Watched, directory and ignored paths for one watch root
///
/// Invariants:
/// - `files` and `ignored` are strictly sorted by [`compare`]
/// - `dirs` is a subset of `files`
/// - no path is in both `files` and `ignored`
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    files: Vec<String>,
    dirs: AHashSet<String>,
    ignored: Vec<String>,
}

impl PathRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path if absent; returns true if it was added
    ///
    /// A path that becomes watched is no longer ignored.
    pub fn insert(&mut self, path: &str) -> bool {
        remove_one(&mut self.ignored, path);
        insert_sorted(&mut self.files, path)
    }

    /// Insert a directory; returns true if it was not tracked before
    pub fn insert_dir(&mut self, path: &str) -> bool {
        self.insert(path);
        self.dirs.insert(path.to_string())
    }

    /// Remove a single path (not its descendants)
    pub fn remove(&mut self, path: &str) -> bool {
        self.dirs.remove(path);
        remove_one(&mut self.files, path)
    }

    /// Remove `dir` and its whole descendant block
    ///
    /// Returns the removed entries in registry order, `dir` first.
    /// Empty if `dir` is not tracked.
    pub fn remove_subtree(&mut self, dir: &str) -> Vec<Removed> {
        let start = match self.files.binary_search_by(|p| compare(p, dir)) {
            Ok(idx) => idx,
            Err(_) => return Vec::new(),
        };
        let end = block_end(&self.files, start, dir);
        let dirs = &mut self.dirs;

        self.files
            .drain(start..end)
            .map(|path| {
                let was_dir = dirs.remove(&path);
                Removed { path, was_dir }
            })
            .collect()
    }

    /// Descendants of `dir` currently tracked, in order
    ///
    /// Empty if `dir` is untracked. The root (`""`) lists everything.
    pub fn list(&self, dir: &str) -> &[String] {
        if dir.is_empty() {
            return &self.files;
        }
        match self.files.binary_search_by(|p| compare(p, dir)) {
            Ok(idx) => &self.files[idx + 1..block_end(&self.files, idx, dir)],
            Err(_) => &[],
        }
    }

    /// Record a path as ignored
    pub fn mark_ignored(&mut self, path: &str) -> bool {
        insert_sorted(&mut self.ignored, path)
    }

    /// Forget an ignored path, optionally along with its ignored descendants
    pub fn unmark_ignored(&mut self, path: &str, recursive: bool) -> usize {
        let start = match self.ignored.binary_search_by(|p| compare(p, path)) {
            Ok(idx) => idx,
            Err(idx) if recursive => idx,
            Err(_) => return 0,
        };
        let end = if recursive {
            let mut end = start;
            while end < self.ignored.len()
                && (self.ignored[end] == path || is_descendant(&self.ignored[end], path))
            {
                end += 1;
            }
            end
        } else {
            start + 1
        };

        self.ignored.drain(start..end).count()
    }

    /// True if the path is tracked (file or directory)
    pub fn contains(&self, path: &str) -> bool {
        self.files.binary_search_by(|p| compare(p, path)).is_ok()
    }

    /// True if the path is a tracked directory
    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    /// True if the path is ignored
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.binary_search_by(|p| compare(p, path)).is_ok()
    }

    /// Every tracked path, sorted
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Tracked directories
    pub fn dirs(&self) -> &AHashSet<String> {
        &self.dirs
    }

    /// Ignored paths, sorted
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn insert_sorted(list: &mut Vec<String>, path: &str) -> bool {
    match list.binary_search_by(|p| compare(p, path)) {
        Ok(_) => false,
        Err(idx) => {
            list.insert(idx, path.to_string());
            true
        }
    }
}

fn remove_one(list: &mut Vec<String>, path: &str) -> bool {
    match list.binary_search_by(|p| compare(p, path)) {
        Ok(idx) => {
            list.remove(idx);
            true
        }
        Err(_) => false,
    }
}

/// One past the last descendant of `list[start]`
fn block_end(list: &[String], start: usize, dir: &str) -> usize {
    let mut end = start + 1;
    while end < list.len() && is_descendant(&list[end], dir) {
        end += 1;
    }
    end
}
