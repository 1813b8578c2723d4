//! Directory-tree change detection
//!
//! This crate keeps an in-memory index of a directory tree and emits
//! normalized events while it changes:
//! - An initial crawl queues one `create` per matching file
//! - Live notifications are reconciled against the index, including
//!   directories that appear or vanish in one notification
//! - Queued emissions are coalesced per path before delivery
//! - Optional resume tokens carry state across runs
//!
//! Paths in events and queries are relative to the root and `/`-separated.

pub mod config;
pub mod crawl;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod event;
pub mod ignore;
pub mod platform;
pub mod reconcile;
pub mod snapshot;

pub use config::{Backend, WatchOptions};
pub use engine::{Engine, EngineState};
pub use error::{Result, WatchError};
pub use event::{Event, EventKind, Listener, Topic};
pub use ignore::{FilterConfig, FilterRules};
pub use platform::{BatchSender, ChannelSource, NativeSource, NotifySource, RawEvent, RawKind};
pub use snapshot::ReplaySummary;
