//! Glob compilation
//!
//! User patterns are split into two groups:
//! - *path patterns* (containing `/` or starting with `**`), matched against
//!   the whole relative path
//! - *name patterns*, matched against the final path segment only
//!
//! Each group is merged into a single [`GlobSet`], so one lookup answers
//! "does any pattern match".
//!
//! Pattern rules:
//! - `/foo/bar` is anchored at the root (leading `/` stripped)
//! - `foo/bar` (no leading `/` or `*`) matches at any depth, i.e. `**/foo/bar`
//! - `foo/` matches the directory `foo` and everything beneath it

use crate::error::{Error, Result};
use crate::path::basename;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

/// Compiled include or exclude list
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    /// Patterns tested against the full relative path
    paths: Option<GlobSet>,
    /// Patterns tested against the basename
    names: Option<GlobSet>,
}

impl GlobMatcher {
    /// Compile a pattern list
    ///
    /// Returns `Ok(None)` for an empty list. Callers treat a missing matcher
    /// as "match nothing" for exclusion and "match everything" for inclusion.
    ///
    /// `root` scopes path patterns to a sub-directory of the watch root.
    pub fn compile<S: AsRef<str>>(patterns: &[S], root: Option<&str>) -> Result<Option<Self>> {
        if patterns.is_empty() {
            return Ok(None);
        }

        let mut paths = GlobSetBuilder::new();
        let mut names = GlobSetBuilder::new();
        let mut path_count = 0;
        let mut name_count = 0;

        for pattern in patterns {
            let pattern = pattern.as_ref();
            if is_path_pattern(pattern) {
                for expanded in expand_path_pattern(pattern, root) {
                    paths.add(build_glob(pattern, &expanded)?);
                    path_count += 1;
                }
            } else {
                names.add(build_glob(pattern, pattern)?);
                name_count += 1;
            }
        }

        let paths = if path_count > 0 {
            Some(finish(paths, patterns)?)
        } else {
            None
        };
        let names = if name_count > 0 {
            Some(finish(names, patterns)?)
        } else {
            None
        };

        Ok(Some(Self { paths, names }))
    }

    /// Test a relative path
    ///
    /// Pass `name` when the basename is already at hand to skip recomputing it.
    pub fn is_match(&self, path: &str, name: Option<&str>) -> bool {
        if let Some(ref names) = self.names {
            let name = name.unwrap_or_else(|| basename(path));
            if names.is_match(name) {
                return true;
            }
        }

        match self.paths {
            Some(ref paths) => paths.is_match(path),
            None => false,
        }
    }
}

fn is_path_pattern(pattern: &str) -> bool {
    pattern.contains('/') || pattern.starts_with("**")
}

/// Expand a path pattern into the concrete globs it stands for
fn expand_path_pattern(pattern: &str, root: Option<&str>) -> Vec<String> {
    let mut glob = if let Some(anchored) = pattern.strip_prefix('/') {
        anchored.to_string()
    } else if pattern.starts_with('*') {
        pattern.to_string()
    } else {
        format!("**/{}", pattern)
    };

    if let Some(root) = root.filter(|r| !r.is_empty()) {
        glob = format!("{}/{}", root.trim_end_matches('/'), glob);
    }

    match glob.strip_suffix('/') {
        // The directory itself plus everything beneath it
        Some(dir) if !dir.is_empty() => vec![dir.to_string(), format!("{}/**", dir)],
        Some(_) => vec!["**".to_string()],
        None => vec![glob],
    }
}

fn build_glob(original: &str, glob: &str) -> Result<Glob> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map_err(|source| Error::InvalidGlob {
            pattern: original.to_string(),
            source,
        })
}

fn finish<S: AsRef<str>>(builder: GlobSetBuilder, patterns: &[S]) -> Result<GlobSet> {
    builder.build().map_err(|source| Error::InvalidGlob {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> GlobMatcher {
        GlobMatcher::compile(patterns, None).unwrap().unwrap()
    }

    #[test]
    fn test_empty_list_is_none() {
        let empty: [&str; 0] = [];
        assert!(GlobMatcher::compile(&empty, None).unwrap().is_none());
    }

    #[test]
    fn test_name_patterns_match_basename_at_any_depth() {
        let m = matcher(&["*.ts", "baz"]);
        assert!(m.is_match("index.ts", None));
        assert!(m.is_match("foo/bar/index.ts", None));
        assert!(m.is_match("foo/bar/baz", None));
        assert!(!m.is_match("foo/bar/index.js", None));
        assert!(!m.is_match("foo/baz/index.js", None));
    }

    #[test]
    fn test_name_argument_short_circuits_basename() {
        let m = matcher(&["bar.ts"]);
        assert!(m.is_match("foo/bar.ts", Some("bar.ts")));
        assert!(!m.is_match("foo/bar.ts", Some("other.ts")));
    }

    #[test]
    fn test_unanchored_path_pattern_matches_any_depth() {
        let m = matcher(&["bar/*.js"]);
        assert!(m.is_match("bar/index.js", None));
        assert!(m.is_match("foo/bar/index.js", None));
        assert!(!m.is_match("foo/bar/baz/index.js", None));
    }

    #[test]
    fn test_leading_slash_anchors_to_root() {
        let m = matcher(&["/foo/*.ts"]);
        assert!(m.is_match("foo/bar.ts", None));
        assert!(!m.is_match("x/foo/bar.ts", None));
    }

    #[test]
    fn test_trailing_slash_covers_directory_and_contents() {
        let m = matcher(&["/foo/bar/"]);
        assert!(m.is_match("foo/bar", None));
        assert!(m.is_match("foo/bar/index.js", None));
        assert!(m.is_match("foo/bar/baz/index.ts", None));
        assert!(!m.is_match("foo/bar.ts", None));
    }

    #[test]
    fn test_leading_double_star_is_path_pattern() {
        let m = matcher(&["**/gen/*.rs"]);
        assert!(m.is_match("gen/a.rs", None));
        assert!(m.is_match("src/gen/a.rs", None));
        assert!(!m.is_match("a.rs", None));
    }

    #[test]
    fn test_root_scoped_matcher() {
        let m = GlobMatcher::compile(&["/*.md"], Some("docs")).unwrap().unwrap();
        assert!(m.is_match("docs/readme.md", None));
        assert!(!m.is_match("readme.md", None));
    }

    #[test]
    fn test_invalid_glob_fails_at_compile_time() {
        let err = GlobMatcher::compile(&["src/[a-"], None).unwrap_err();
        match err {
            Error::InvalidGlob { pattern, .. } => assert_eq!(pattern, "src/[a-"),
        }
    }
}
