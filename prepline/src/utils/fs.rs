//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors so log lines and
//! step error messages say what was being done where.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Resolve `path` against the current directory without touching the filesystem.
pub fn absolute(op: &'static str, path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::io_path(op, path, e))
}
