//! Backing-store boundary.
//!
//! The driver never touches the disk directly; every stat, read, write and
//! shape change goes through a [`BackingStore`]. [`LocalStore`] is the
//! passthrough implementation over the local filesystem. All calls are
//! blocking and run on the calling handler's thread.

use filetime::FileTime;
use std::ffi::OsString;
use std::fs::{self, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Permission bits (including setuid/setgid/sticky) of a mode.
pub const PERMISSION_MASK: u32 = 0o7777;

/// Metadata of a backing node, as seen by one stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// On-disk inode number, stable for the duration of the call.
    pub ino: u64,
    /// Size in bytes.
    pub size: u64,
    /// Full `st_mode` (file type and permission bits).
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Creation time; the change time where the backing filesystem has none.
    pub crtime: SystemTime,
    /// Whether the node is a directory.
    pub is_dir: bool,
}

impl Stat {
    /// Build from `std::fs` metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ctime = unix_time(meta.ctime(), meta.ctime_nsec());
        Self {
            ino: meta.ino(),
            size: meta.size(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime,
            crtime: meta.created().unwrap_or(ctime),
            is_dir: meta.is_dir(),
        }
    }
}

/// One child of a backing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChild {
    /// Entry name (a single path component).
    pub name: OsString,
    /// On-disk inode number.
    pub ino: u64,
    /// Whether the child is a directory.
    pub is_dir: bool,
}

/// Local hierarchical file-I/O capability the driver is built on.
///
/// Implementations must be safe to call from many handler threads at once;
/// the driver adds no per-path locking of its own.
pub trait BackingStore: Send + Sync + 'static {
    /// Stat a path, following symlinks.
    fn stat(&self, path: &Path) -> io::Result<Stat>;

    /// List the children of a directory in backing-store order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirChild>>;

    /// Create a regular file with exactly `mode` permission bits. Fails with
    /// `AlreadyExists` if the path is taken.
    fn create_file(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create a directory. Fails with `AlreadyExists` if the path is taken.
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Remove a directory and everything below it.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Atomically rename `from` to `to`, replacing `to` if present.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Change permission bits.
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Change owner and/or group; `None` leaves that id untouched.
    fn set_owner(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()>;

    /// Change access and/or modification time; `None` leaves it untouched.
    fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()>;

    /// Truncate or extend a file to `size` bytes.
    fn truncate(&self, path: &Path, size: u64) -> io::Result<()>;

    /// Positioned read. Returns fewer bytes than `dst.len()` only at end of file.
    fn read_at(&self, path: &Path, offset: u64, dst: &mut [u8]) -> io::Result<usize>;

    /// Positioned write of all of `data`.
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Flush file contents and metadata to durable storage.
    fn sync(&self, path: &Path) -> io::Result<()>;
}

/// Passthrough [`BackingStore`] over the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStore;

impl BackingStore for LocalStore {
    fn stat(&self, path: &Path) -> io::Result<Stat> {
        fs::metadata(path).map(|meta| Stat::from_metadata(&meta))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirChild>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // Entry removed between getdents and the type probe
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            children.push(DirChild {
                name: entry.file_name(),
                ino: entry.ino(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(children)
    }

    fn create_file(&self, path: &Path, mode: u32) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode & PERMISSION_MASK)
            .open(path)?;
        // The open mode is filtered by the process umask
        file.set_permissions(Permissions::from_mode(mode & PERMISSION_MASK))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new()
            .mode(mode & PERMISSION_MASK)
            .create(path)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode & PERMISSION_MASK))
    }

    fn set_owner(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        use nix::unistd::{chown, Gid, Uid};

        chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw)).map_err(io::Error::from)
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()> {
        match (atime, mtime) {
            (Some(a), Some(m)) => filetime::set_file_times(
                path,
                FileTime::from_system_time(a),
                FileTime::from_system_time(m),
            ),
            (Some(a), None) => filetime::set_file_atime(path, FileTime::from_system_time(a)),
            (None, Some(m)) => filetime::set_file_mtime(path, FileTime::from_system_time(m)),
            (None, None) => Ok(()),
        }
    }

    fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        OpenOptions::new().write(true).open(path)?.set_len(size)
    }

    fn read_at(&self, path: &Path, offset: u64, dst: &mut [u8]) -> io::Result<usize> {
        let file = File::open(path)?;
        let mut filled = 0;
        while filled < dst.len() {
            match file.read_at(&mut dst[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<usize> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    fn sync(&self, path: &Path) -> io::Result<()> {
        File::open(path)?.sync_all()
    }
}

/// Convert a `(seconds, nanoseconds)` pair relative to the Unix epoch.
fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(u64::try_from(nsecs).unwrap_or(0));
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs()) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}
