//! Resource path normalization.
//!
//! Paths are stored and compared in normalized form: backslashes become `/`,
//! empty and `.` segments disappear, so `"/a//./b/"` and `"a\\b"` both
//! normalize to `"a/b"`. A `..` segment makes the path invalid.

use crate::config::PATH_SEPARATOR;

/// Returns the normalized path, or `None` if the path contains `..`.
/// The empty string is the valid root path.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => {
                if !normalized.is_empty() {
                    normalized.push(PATH_SEPARATOR);
                }
                normalized.push_str(segment);
            }
        }
    }
    Some(normalized)
}

/// Checks whether `path` equals `prefix` or lies below it. Both must be normalized.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(PATH_SEPARATOR),
        None => false,
    }
}

/// Replaces the `source` prefix of `path` with `target`. Both prefixes must be normalized
/// and `path` must lie within `source`.
pub fn rebase(path: &str, source: &str, target: &str) -> String {
    let rest = path[source.len()..].trim_start_matches(PATH_SEPARATOR);
    match (target.is_empty(), rest.is_empty()) {
        (_, true) => target.to_string(),
        (true, false) => rest.to_string(),
        (false, false) => format!("{}{}{}", target, PATH_SEPARATOR, rest),
    }
}
