//! Watcher options
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! only = ["*.rs", "*.toml"]
//! skip = ["target/", ".git/"]
//! snapshot_path = ".treespy/snapshot"
//!
//! [backend]
//! kind = "poll"
//! interval_ms = 500
//! ```

use crate::error::{Result, WatchError};
use crate::ignore::FilterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default window for grouping raw notifications into one batch
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 50;

/// Options recognised by `Engine::open`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Inclusion / exclusion globs
    #[serde(flatten)]
    pub filters: FilterConfig,

    /// Notification backend, passed through to the notification source
    #[serde(default)]
    pub backend: Backend,

    /// Resume token location; enables snapshot replay when set
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// How long raw notifications are gathered into one batch
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            filters: FilterConfig::default(),
            backend: Backend::default(),
            snapshot_path: None,
            batch_window_ms: DEFAULT_BATCH_WINDOW_MS,
        }
    }
}

impl WatchOptions {
    /// Add inclusion globs
    pub fn only<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.only.extend(globs.into_iter().map(Into::into));
        self
    }

    /// Add exclusion globs
    pub fn skip<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.skip.extend(globs.into_iter().map(Into::into));
        self
    }

    /// Select the notification backend
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Enable snapshot replay with a token at `path`
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Batch window as a duration
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Parse options from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Load options from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

/// Platform notification backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Best native backend for the platform (inotify, FSEvents, ReadDirectoryChangesW)
    #[default]
    Recommended,
    /// Periodic polling
    Poll { interval_ms: u64 },
}

fn default_batch_window_ms() -> u64 {
    DEFAULT_BATCH_WINDOW_MS
}
