//! Errno classification for backing-store errors.
//!
//! Backing-store failures are passed to the kernel verbatim: when the
//! `io::Error` carries a raw OS error it is returned unchanged. Errors
//! synthesized in userspace (no raw code) are classified by kind.

use std::io;

/// Converts an I/O error to a POSIX errno for the kernel.
///
/// Returns the raw OS error when present, otherwise maps the error kind,
/// falling back to `EIO`.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    if let Some(code) = e.raw_os_error() {
        return code;
    }
    match e.kind() {
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::AlreadyExists => libc::EEXIST,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidFilename => libc::EINVAL,
        io::ErrorKind::NotADirectory => libc::ENOTDIR,
        io::ErrorKind::IsADirectory => libc::EISDIR,
        io::ErrorKind::DirectoryNotEmpty => libc::ENOTEMPTY,
        io::ErrorKind::StorageFull => libc::ENOSPC,
        io::ErrorKind::ReadOnlyFilesystem => libc::EROFS,
        io::ErrorKind::CrossesDevices => libc::EXDEV,
        io::ErrorKind::Unsupported => libc::ENOSYS,
        io::ErrorKind::TimedOut => libc::ETIMEDOUT,
        io::ErrorKind::Interrupted => libc::EINTR,
        _ => libc::EIO,
    }
}
