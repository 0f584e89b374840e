//! Path helpers shared by the preparer and the static tree.

use std::path::{Component, Path, PathBuf};

/// Joins path segments in order with the platform separator.
pub fn join<I, P>(parts: I) -> PathBuf
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut out = PathBuf::new();
    for part in parts {
        out.push(part);
    }
    out
}

/// Converts a relative filesystem path into a `/`-separated tree key.
///
/// Returns `None` for paths that are absolute or climb out with `..`.
pub fn tree_key(relative: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(segments.join("/"))
}

/// Percent-decodes a request path tail and normalises it into a tree key.
///
/// A trailing slash is preserved since it selects directory handling.
/// Returns `None` when decoding fails or the path contains `..`.
pub fn request_key(tail: &str) -> Option<String> {
    let decoded = urlencoding::decode(tail).ok()?;
    let wants_dir = decoded.ends_with('/');
    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            other if other.contains('\\') || other.contains('\0') => return None,
            other => segments.push(other),
        }
    }
    let mut key = segments.join("/");
    if wants_dir && !key.is_empty() {
        key.push('/');
    }
    Some(key)
}
