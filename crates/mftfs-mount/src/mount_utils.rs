//! Mount point utilities.
//!
//! Validates the mount point before handing it to the FUSE session and
//! detects when a mount has become active (or disappeared) by comparing
//! device ids with the parent directory. The stat runs on a helper thread
//! with a timeout, since stat on a hung FUSE mount blocks indefinitely.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for the device-id probe used by [`is_mounted`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors from the mount lifecycle.
#[derive(Debug, Error)]
pub enum MountError {
    /// The backing root is missing or not a directory.
    #[error("Invalid backing root {}: {reason}", path.display())]
    InvalidBackingRoot {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The mount point is unusable.
    #[error("Invalid mount point {}: {reason}", path.display())]
    InvalidMountpoint {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The filesystem could not be constructed (initial cache build failed).
    #[error("Failed to create filesystem: {0}")]
    FilesystemCreation(String),

    /// The FUSE session could not be started or torn down.
    #[error("Mount failed: {0}")]
    Mount(#[from] io::Error),
}

/// Validate a mount point, creating it if missing, and return its canonical path.
pub fn prepare_mountpoint(path: &Path) -> Result<PathBuf, MountError> {
    match std::fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return Err(MountError::InvalidMountpoint {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(mountpoint = %path.display(), "Creating missing mount point");
            std::fs::create_dir_all(path)?;
        }
        Err(e) => return Err(MountError::Mount(e)),
    }
    Ok(std::fs::canonicalize(path)?)
}

/// Check whether a filesystem is mounted at `path`.
///
/// A mount is detected when the path's device id differs from its
/// parent's. Returns `false` if either stat fails or does not answer
/// within `timeout`.
pub fn is_mounted(path: &Path, timeout: Duration) -> bool {
    use std::os::unix::fs::MetadataExt;

    let path = path.to_path_buf();
    let parent = path.parent().map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let result = match (std::fs::metadata(&path), std::fs::metadata(&parent)) {
            (Ok(own), Ok(up)) => own.dev() != up.dev(),
            _ => false,
        };
        let _ = tx.send(result);
    });

    rx.recv_timeout(timeout).unwrap_or(false)
}
