//! Events delivered to subscribers

use crate::error::WatchError;
use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;

/// One emission from the engine
///
/// Each variant carries exactly what its kind guarantees: file events carry
/// the relative path (and stats for creations and updates), `Crawl` names a
/// directory whose enumeration finished.
#[derive(Debug, Clone)]
pub enum Event {
    Create { path: String, stats: Metadata },
    Update { path: String, stats: Metadata },
    Delete { path: String },
    Crawl { dir: String },
    Ready,
    Error(Arc<WatchError>),
}

/// Kind tag for file events, as seen by `all` subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Event {
    /// Kind tag for create/update/delete, `None` for the rest
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Create { .. } => Some(EventKind::Create),
            Self::Update { .. } => Some(EventKind::Update),
            Self::Delete { .. } => Some(EventKind::Delete),
            _ => None,
        }
    }

    /// Relative path of a file event, or the directory of a crawl event
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Create { path, .. } | Self::Update { path, .. } | Self::Delete { path } => {
                Some(path)
            }
            Self::Crawl { dir } => Some(dir),
            _ => None,
        }
    }

    /// Stats of a create or update
    pub fn stats(&self) -> Option<&Metadata> {
        match self {
            Self::Create { stats, .. } | Self::Update { stats, .. } => Some(stats),
            _ => None,
        }
    }

    /// Name used in logs and CLI output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Crawl { .. } => "crawl",
            Self::Ready => "ready",
            Self::Error(_) => "error",
        }
    }
}

/// What a listener subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Create,
    Update,
    Delete,
    Crawl,
    Ready,
    /// Failures, delivered as they happen rather than through the debounce
    /// queue; an error can arrive before queued events it relates to
    Error,
    /// Every create, update and delete
    All,
}

impl Topic {
    /// True if an event is delivered to listeners of this topic
    pub fn accepts(&self, event: &Event) -> bool {
        match (self, event) {
            (Topic::All, event) => event.kind().is_some(),
            (Topic::Create, Event::Create { .. })
            | (Topic::Update, Event::Update { .. })
            | (Topic::Delete, Event::Delete { .. })
            | (Topic::Crawl, Event::Crawl { .. })
            | (Topic::Ready, Event::Ready)
            | (Topic::Error, Event::Error(_)) => true,
            _ => false,
        }
    }
}

/// Subscriber callback: the event plus the watch root
pub type Listener = Arc<dyn Fn(&Event, &Path) + Send + Sync>;
