//! Path normalization and tree arithmetic.
//!
//! Paths are absolute, slash-separated strings. Parents are computed from
//! the string, never stored.

use crate::error::{CoordError, Result};

/// The root path. Always present in a store.
pub const ROOT: &str = "/";

/// Maximum path length in bytes.
pub const MAX_PATH_LENGTH: usize = 1024;

/// Normalize an absolute path.
///
/// Collapses repeated slashes, resolves `.` and `..` (never climbing above
/// the root) and strips any trailing slash except on the root itself.
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(CoordError::BadArguments("path cannot be empty".to_string()));
    }
    if !path.starts_with('/') {
        return Err(CoordError::BadArguments(format!(
            "path must be absolute: {path}"
        )));
    }
    if path.contains('\0') {
        return Err(CoordError::BadArguments(
            "path cannot contain NUL".to_string(),
        ));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    let normalized = if parts.is_empty() {
        ROOT.to_string()
    } else {
        let mut out = String::with_capacity(path.len());
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
        out
    };

    if normalized.len() > MAX_PATH_LENGTH {
        return Err(CoordError::BadArguments(format!(
            "path exceeds maximum length of {} bytes",
            MAX_PATH_LENGTH
        )));
    }
    Ok(normalized)
}

/// Parent of a normalized path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final component of a normalized path. Empty for the root.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// All proper ancestors of a normalized path, closest first, root last.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(p) = parent(current) {
        out.push(p);
        current = p;
    }
    out
}

/// Prefix shared by every descendant of `path`.
pub(crate) fn child_prefix(path: &str) -> String {
    if path == ROOT {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_valid() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/a/b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("//a///b").unwrap(), "/a/b");
    }

    #[test]
    fn test_normalize_dots() {
        assert_eq!(normalize("/a/./b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/..").unwrap(), "/");
        assert_eq!(normalize("/a/../..").unwrap(), "/");
    }

    #[test]
    fn test_normalize_rejects() {
        assert!(matches!(normalize(""), Err(CoordError::BadArguments(_))));
        assert!(matches!(normalize("a/b"), Err(CoordError::BadArguments(_))));
        assert!(matches!(
            normalize("/a\0b"),
            Err(CoordError::BadArguments(_))
        ));
        let long = format!("/{}", "x".repeat(MAX_PATH_LENGTH));
        assert!(matches!(normalize(&long), Err(CoordError::BadArguments(_))));
    }

    #[test]
    fn test_parent_and_basename() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/"), "");
    }

    #[test]
    fn test_ancestors_closest_first() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a/b", "/a", "/"]);
        assert!(ancestors("/").is_empty());
    }

    #[test]
    fn test_child_prefix() {
        assert_eq!(child_prefix("/"), "/");
        assert_eq!(child_prefix("/a"), "/a/");
    }
}
