//! Traversal-safe path resolution
//!
//! Filesystem resources are interpreted as paths beneath the authorizing
//! capability's root. Resolution is pure segment arithmetic: `.` and `..`
//! are normalized without touching the filesystem, and any path that
//! escapes the root fails with `PathTraversal` before constraint checks
//! run. Symlinks are the caller's problem; requests must arrive
//! pre-canonicalized.

use crate::error::{CapsError, Result};

/// Resolve `requested` against a capability rooted at `root`.
///
/// Both arguments are path segment slices (the URI layer has already
/// split and validated them). Returns the root-relative segments of the
/// normalized path; the result is empty when the request names the root
/// itself.
pub fn resolve_relative(root: &[String], requested: &[String]) -> Result<Vec<String>> {
    let display = || requested.join("/");

    let mut normalized: Vec<&str> = Vec::with_capacity(requested.len());
    for segment in requested {
        match segment.as_str() {
            "." => {}
            ".." => {
                if normalized.pop().is_none() {
                    return Err(CapsError::PathTraversal(display()));
                }
            }
            other => normalized.push(other),
        }
    }

    // The normalized path must still live at or below the root.
    if normalized.len() < root.len()
        || !normalized
            .iter()
            .zip(root.iter())
            .all(|(seg, root_seg)| *seg == root_seg)
    {
        return Err(CapsError::PathTraversal(display()));
    }

    Ok(normalized[root.len()..]
        .iter()
        .map(|s| s.to_string())
        .collect())
}
