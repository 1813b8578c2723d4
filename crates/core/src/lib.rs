//! Treespy Core - path bookkeeping primitives for the treespy watcher
//!
//! This crate provides the pieces that carry no I/O:
//! - Segment-wise path ordering and relative path helpers
//! - Glob compilation into path/name matchers
//! - The sorted path registry (watched, directory and ignored sets)

pub mod error;
pub mod glob;
pub mod path;
pub mod registry;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use glob::GlobMatcher;
pub use registry::{PathRegistry, Removed};
