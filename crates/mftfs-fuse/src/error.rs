//! Error handling and mapping for the passthrough filesystem.
//!
//! Handlers return [`FsError`]; the FUSE adapter converts it to a POSIX
//! errno with [`FsError::to_errno`]. Backing-store failures travel as
//! [`FsError::Io`] and keep their raw OS error.

use mftfs_mount::io_error_to_errno;
use std::io;
use thiserror::Error;

/// Errors a filesystem operation can produce.
#[derive(Debug, Error)]
pub enum FsError {
    /// Inode or named child absent after a cache rebuild, or a handle that
    /// is not registered against the inode it was presented with.
    #[error("No such inode or handle")]
    NotFound,

    /// An operation that needs a directory parent got something else.
    #[error("Not a directory")]
    NotADirectory,

    /// Create/mkdir target already present.
    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    /// Rename would replace a non-empty directory.
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Operation class intentionally unsupported.
    #[error("Operation not implemented: {0}")]
    Unimplemented(&'static str),

    /// Child name that cannot name a single path component.
    #[error("Invalid entry name: {0:?}")]
    InvalidName(String),

    /// Any other backing-store failure, passed through verbatim.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::Unimplemented(_) => libc::ENOSYS,
            FsError::InvalidName(_) => libc::EINVAL,
            FsError::Io(e) => io_error_to_errno(e),
        }
    }

    /// True if this is a backing-store "no such file" error or [`FsError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for FsError {
    fn to_errno(&self) -> i32 {
        FsError::to_errno(self)
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}
