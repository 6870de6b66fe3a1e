//! Virtual-to-backing path translation.
//!
//! A mounted view exposes virtual paths rooted at `/`; every operation
//! is served from the backing root joined with the virtual path. The
//! join is a plain concatenation: no normalization, no symlink or `..`
//! resolution. The backing tree is trusted the same way the mounted
//! view is, so a traversal component simply resolves wherever the
//! backing filesystem takes it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::constants::MAX_RESOLVED_PATH_BYTES;
use crate::error::PathError;

/// Resolve a virtual path against the backing root.
///
/// The result is the literal concatenation of `root` and
/// `virtual_path`, recomputed on every call. The only validation is a
/// length bound: a result longer than `MAX_RESOLVED_PATH_BYTES` fails
/// explicitly instead of being truncated.
///
/// # Arguments
/// * `root` - Backing root directory (absolute, no trailing slash)
/// * `virtual_path` - Path within the mounted view, rooted at `/`
///
/// # Errors
/// Returns `PathError::PathTooLong` if the concatenation exceeds the
/// length bound.
pub fn resolve_backing(root: &Path, virtual_path: &str) -> Result<PathBuf, PathError> {
    let mut resolved: OsString = root.as_os_str().to_owned();
    resolved.push(virtual_path);

    let length: usize = resolved.len();
    if length > MAX_RESOLVED_PATH_BYTES {
        return Err(PathError::PathTooLong {
            path: resolved.to_string_lossy().into_owned(),
            length,
            max: MAX_RESOLVED_PATH_BYTES,
        });
    }

    Ok(PathBuf::from(resolved))
}

/// Canonicalize a backing root supplied on the command line.
///
/// The root must exist; it is resolved to an absolute path once at
/// startup and never re-resolved afterwards.
///
/// # Arguments
/// * `path` - Backing root as given by the user
///
/// # Errors
/// Returns error if the path cannot be canonicalized.
pub fn canonical_backing_root(path: &Path) -> Result<PathBuf, PathError> {
    std::fs::canonicalize(path)
        .map_err(|e: std::io::Error| PathError::from_io(path.display().to_string(), e))
}
