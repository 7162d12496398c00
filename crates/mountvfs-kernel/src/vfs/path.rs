//! Path canonicalization.
//!
//! VFS paths are plain strings with `/` as the separator. Backslashes are
//! accepted on input and treated as separators. These functions are pure and
//! never touch a provider.

/// Path separator.
pub const SEPARATOR: char = '/';

/// Split a path into its canonical segments.
///
/// Empty segments and `.` are dropped. Each `..` removes the nearest
/// preceding real segment; a `..` with nothing to remove is dropped.
pub fn segments(path: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part.to_string()),
        }
    }
    parts
}

/// Canonicalize a path.
///
/// A leading separator is preserved, trailing separators are not.
///
/// ```
/// use mountvfs_kernel::vfs::path::canonicalize;
///
/// assert_eq!(canonicalize("/a//b/../c"), "/a/c");
/// assert_eq!(canonicalize("a/./b"), "a/b");
/// assert_eq!(canonicalize("/a/../../b"), "/b");
/// ```
pub fn canonicalize(path: &str) -> String {
    let joined = segments(path).join("/");
    if is_absolute(path) {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Returns true if the path starts with a separator.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with(['/', '\\'])
}

/// Join two paths and canonicalize the result.
pub fn concat(base: &str, rest: &str) -> String {
    canonicalize(&format!("{base}/{rest}"))
}

/// Last segment of the path, or `None` for the root.
pub fn name(path: &str) -> Option<String> {
    segments(path).pop()
}

/// Canonical path of the containing directory.
///
/// The parent of the root is the root itself.
pub fn parent(path: &str) -> String {
    let mut parts = segments(path);
    parts.pop();
    let joined = parts.join("/");
    if is_absolute(path) {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_collapses() {
        assert_eq!(canonicalize("/a//b/../c"), "/a/c");
        assert_eq!(canonicalize("a/./b"), "a/b");
        assert_eq!(canonicalize("/a/../../b"), "/b");
        assert_eq!(canonicalize("/"), "/");
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("/mnt/x/"), "/mnt/x");
    }

    #[test]
    fn test_canonicalize_backslashes() {
        assert_eq!(canonicalize("\\mnt\\x\\file.txt"), "/mnt/x/file.txt");
        assert_eq!(canonicalize("a\\..\\b"), "b");
    }

    #[test]
    fn test_excess_parent_is_dropped() {
        assert_eq!(canonicalize(".."), "");
        assert_eq!(canonicalize("/../.."), "/");
        assert_eq!(segments("../../a"), vec!["a"]);
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("/mnt/x/a.txt"), vec!["mnt", "x", "a.txt"]);
        assert!(segments("///").is_empty());
    }

    #[test]
    fn test_concat() {
        assert_eq!(concat("/mnt", "x"), "/mnt/x");
        assert_eq!(concat("/mnt/", "/x/"), "/mnt/x");
        assert_eq!(concat("/mnt/x", "../y"), "/mnt/y");
    }

    #[test]
    fn test_name_and_parent() {
        assert_eq!(name("/mnt/x/a.txt").as_deref(), Some("a.txt"));
        assert_eq!(name("/"), None);
        assert_eq!(parent("/mnt/x/a.txt"), "/mnt/x");
        assert_eq!(parent("/mnt"), "/");
        assert_eq!(parent("/"), "/");
    }
}
