//! Include/exclude filter rules
//!
//! Two independently compiled lists decide what the engine watches:
//! 1. `skip` globs (exclusion, default: nothing) prune files and whole directories
//! 2. `only` globs (inclusion, default: everything) select which files are emitted
//!
//! A path is watched iff `skip` does not match it and `only` (if present) does.
//! `only` is applied to files only; directories are always descended unless skipped.

use serde::{Deserialize, Serialize};
use treespy_core::{GlobMatcher, Result};

/// Compiled filter rules for one engine
#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    /// Inclusion globs (`None` = match all)
    only: Option<GlobMatcher>,

    /// Exclusion globs (`None` = match none)
    skip: Option<GlobMatcher>,
}

impl FilterRules {
    /// Compile both lists; invalid globs fail here, before any I/O
    pub fn compile(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            only: GlobMatcher::compile(&config.only, None)?,
            skip: GlobMatcher::compile(&config.skip, None)?,
        })
    }

    /// True if the path is excluded by `skip`
    pub fn is_skipped(&self, path: &str, name: Option<&str>) -> bool {
        match self.skip {
            Some(ref skip) => skip.is_match(path, name),
            None => false,
        }
    }

    /// True if a file passes the `only` list
    pub fn is_included(&self, path: &str, name: Option<&str>) -> bool {
        match self.only {
            Some(ref only) => only.is_match(path, name),
            None => true,
        }
    }

    /// True if a file at this path would be emitted
    pub fn is_watched(&self, path: &str, name: Option<&str>) -> bool {
        !self.is_skipped(path, name) && self.is_included(path, name)
    }

    /// Get number of active filter lists
    pub fn active_lists(&self) -> usize {
        self.only.is_some() as usize + self.skip.is_some() as usize
    }
}

/// Filter configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Emit only files matching these globs
    #[serde(default)]
    pub only: Vec<String>,

    /// Never emit files or crawl directories matching these globs
    #[serde(default)]
    pub skip: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(only: &[&str], skip: &[&str]) -> FilterRules {
        FilterRules::compile(&FilterConfig {
            only: only.iter().map(|s| s.to_string()).collect(),
            skip: skip.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_defaults_watch_everything() {
        let rules = rules(&[], &[]);
        assert_eq!(rules.active_lists(), 0);
        assert!(rules.is_watched("foo/bar.ts", None));
        assert!(!rules.is_skipped("foo", None));
    }

    #[test]
    fn test_skip_takes_precedence_over_only() {
        let rules = rules(&["*.ts"], &["bar.ts", "baz"]);
        assert_eq!(rules.active_lists(), 2);

        assert!(rules.is_skipped("foo/bar.ts", None));
        assert!(!rules.is_watched("foo/bar.ts", None));

        assert!(rules.is_skipped("foo/bar/baz", Some("baz")));

        assert!(!rules.is_skipped("foo/bar/index.js", None));
        assert!(!rules.is_included("foo/bar/index.js", None));

        assert!(rules.is_watched("foo/bar/baz.ts", None));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let err = FilterRules::compile(&FilterConfig {
            only: vec![],
            skip: vec!["a[".to_string()],
        });
        assert!(err.is_err());
    }
}
