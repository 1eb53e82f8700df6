//! Destination path helpers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Derives a file name from the last segment of a URL path.
///
/// Returns `None` when the URL has no usable path segment.
#[must_use]
pub fn file_name_from_url(url: &url::Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(|s| s.replace(['/', '\\'], "_"))
}

/// Inserts `_<n>` before the extension: `f.zip` → `f_1.zip`, `f` → `f_1`.
#[must_use]
pub fn with_suffix(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// Returns the first of `path`, `path_1`, `path_2`, … that is neither in
/// `taken` nor present on disk.
#[must_use]
pub fn unique_save_path(path: &Path, taken: &HashSet<PathBuf>) -> PathBuf {
    let is_free = |p: &Path| !taken.contains(p) && !p.exists();
    if is_free(path) {
        return path.to_path_buf();
    }
    (1..)
        .map(|n| with_suffix(path, n))
        .find(|p| is_free(p))
        .unwrap_or_else(|| path.to_path_buf())
}

/// Returns the size of a file if it exists.
pub async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Removes a file, treating "not found" as success.
///
/// # Errors
///
/// Returns any I/O error other than `NotFound`.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
