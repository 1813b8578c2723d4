//! Relative path helpers
//!
//! Every path the engine tracks is a `/`-separated string relative to the
//! watch root. The root itself is the empty string.

use std::cmp::Ordering;
use std::path::{Component, Path};

/// Total order over relative paths
///
/// Segments are compared case-insensitively; the first differing segment
/// decides. An ancestor sorts before its descendants, so a directory and
/// everything beneath it form one contiguous run in a sorted list.
///
/// Segments that differ only by case are ordered bytewise at that segment,
/// which keeps distinct paths from ever comparing equal.
pub fn compare(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut left = a.split('/');
    let mut right = b.split('/');

    loop {
        match (left.next(), right.next()) {
            (Some(x), Some(y)) => match compare_segment(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}

fn compare_segment(x: &str, y: &str) -> Ordering {
    let folded = x
        .chars()
        .flat_map(char::to_uppercase)
        .cmp(y.chars().flat_map(char::to_uppercase));

    folded.then_with(|| x.cmp(y))
}

/// True if `path` lies strictly beneath `dir`
///
/// Everything except the root itself is a descendant of the root.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return !path.is_empty();
    }
    path.len() > dir.len() && path.as_bytes()[dir.len()] == b'/' && path.starts_with(dir)
}

/// Join a child name onto a relative directory
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent directory of a relative path (`""` for top-level entries)
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final segment of a relative path
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Convert an absolute path under `root` into its relative form
///
/// Returns `None` for paths outside the root or with non-UTF-8 segments.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let mut out = String::new();

    for component in rest.components() {
        match component {
            Component::Normal(segment) => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(segment.to_str()?);
            }
            Component::CurDir => {}
            _ => return None,
        }
    }

    Some(out)
}
