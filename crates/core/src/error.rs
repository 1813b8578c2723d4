//! Error types for treespy-core

use thiserror::Error;

/// Convenience type for fallible core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Things that can go wrong while building filters.
#[derive(Error, Debug)]
pub enum Error {
    /// A glob could not be compiled. Raised at construction, never at match time.
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}
