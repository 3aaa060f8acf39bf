//! Filesystem helpers shared across modules.
//!
//! Cleanup here never raises: transfer pipelines call these from
//! terminal phases where a removal failure must not change the outcome.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{info, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    ensure_dir_all_with_op("creating directory", path).await
}

/// Remove a file without raising.
///
/// Returns true when the file was removed. A missing file or a failed
/// removal returns false; the failure is logged.
pub async fn remove_quiet(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Cleaned up: {}", file_label(path));
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Cleanup failed for {}: {}", file_label(path), e);
            false
        }
    }
}

/// Remove several files concurrently; returns how many were removed.
pub async fn remove_many(paths: &[PathBuf]) -> usize {
    join_all(paths.iter().map(|p| remove_quiet(p)))
        .await
        .into_iter()
        .filter(|removed| *removed)
        .count()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
