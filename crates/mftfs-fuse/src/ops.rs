//! Operation handlers.
//!
//! [`PassthroughFs`] answers each protocol operation with typed arguments
//! and a typed result, independent of the FUSE transport. The shape of every
//! handler is the same: resolve inode(s) through the [`InodeDirectory`],
//! check preconditions, perform one backing-store action, then fill a reply
//! through the [`AttrTranslator`] or the listing codec.
//!
//! Handlers take `&self` and are safe to run concurrently; the only shared
//! state is the inode directory and the handle table, whose locks never
//! cover backing-store I/O.

use crate::attr::{AttrReply, AttrTranslator, ChildEntry, S_IFMT, S_IFREG};
use crate::backing::{BackingStore, LocalStore};
use crate::config::MountConfig;
use crate::dirent::{ListingPage, fill_listing};
use crate::error::{FsError, FsResult};
use crate::handles::OpenHandleTable;
use crate::inode::{InodeDirectory, ROOT_INODE};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Block size of the synthetic capacity model.
pub const STATFS_BLOCK_SIZE: u32 = 4096;
/// Total blocks of the synthetic capacity model.
pub const STATFS_BLOCKS: u64 = 64;
/// Total inodes of the synthetic capacity model.
pub const STATFS_INODES: u64 = 128;
/// Longest name accepted by the backing store.
pub const NAME_MAX: u32 = 255;

/// Synthetic filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub inodes: u64,
    pub inodes_free: u64,
    pub block_size: u32,
    pub io_size: u32,
    pub name_max: u32,
}

/// Attribute changes requested by setattr. `None` fields are untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrs {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
}

/// Reply of a successful create: the new child and its open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedFile {
    pub entry: ChildEntry,
    pub handle: u64,
}

/// Passthrough filesystem over a backing directory tree.
pub struct PassthroughFs<S: BackingStore = LocalStore> {
    store: Arc<S>,
    inodes: InodeDirectory<S>,
    handles: OpenHandleTable,
    attrs: AttrTranslator,
}

impl PassthroughFs<LocalStore> {
    /// Expose the local directory `root`.
    ///
    /// # Errors
    ///
    /// Fails if the initial traversal of `root` fails.
    pub fn new(root: impl Into<PathBuf>, config: &MountConfig) -> FsResult<Self> {
        Self::with_store(LocalStore, root.into(), config)
    }
}

impl<S: BackingStore> PassthroughFs<S> {
    /// Expose `root` through a custom backing store.
    ///
    /// # Errors
    ///
    /// Fails if the initial traversal of `root` fails.
    pub fn with_store(store: S, root: PathBuf, config: &MountConfig) -> FsResult<Self> {
        let store = Arc::new(store);
        let inodes = InodeDirectory::build(Arc::clone(&store), root)?;
        info!(
            root = %inodes.root().display(),
            entries = inodes.len(),
            "Built inode cache"
        );
        Ok(Self {
            store,
            inodes,
            handles: OpenHandleTable::new(),
            attrs: AttrTranslator::new(config.entry_ttl, config.attr_ttl),
        })
    }

    /// The inode directory.
    pub fn inodes(&self) -> &InodeDirectory<S> {
        &self.inodes
    }

    /// The open-handle table.
    pub fn handles(&self) -> &OpenHandleTable {
        &self.handles
    }

    /// The attribute translator (for TTLs).
    pub fn attr_translator(&self) -> &AttrTranslator {
        &self.attrs
    }

    /// Resolve a parent inode and check that it is a directory.
    fn resolve_dir(&self, parent: u64) -> FsResult<PathBuf> {
        let path = self.inodes.resolve(parent)?;
        if !self.store.stat(&path)?.is_dir {
            return Err(FsError::NotADirectory);
        }
        Ok(path)
    }

    // ===== Statistics =====

    /// Synthetic capacity derived from the root's size and the cache size.
    pub fn statfs(&self) -> FsResult<StatFs> {
        let root = self.store.stat(self.inodes.root())?;
        let used = root.size / u64::from(STATFS_BLOCK_SIZE);
        let blocks_free = STATFS_BLOCKS.saturating_sub(used);
        Ok(StatFs {
            blocks: STATFS_BLOCKS,
            blocks_free,
            blocks_available: blocks_free,
            inodes: STATFS_INODES,
            inodes_free: STATFS_INODES.saturating_sub(self.inodes.len() as u64),
            block_size: STATFS_BLOCK_SIZE,
            io_size: STATFS_BLOCK_SIZE,
            name_max: NAME_MAX,
        })
    }

    // ===== Inodes =====

    /// Look up `name` under `parent`. A missing child is `Ok(None)`.
    pub fn lookup(&self, parent: u64, name: &OsStr) -> FsResult<Option<ChildEntry>> {
        trace!(parent, name = ?name, "lookup");
        let dir = self.resolve_dir(parent)?;
        let path = child_path(&dir, name)?;

        let stat = match self.store.stat(&path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.inodes.record(stat.ino, path);
        Ok(Some(self.attrs.child_entry(&stat)))
    }

    /// Current attributes of `ino`.
    pub fn get_attr(&self, ino: u64) -> FsResult<AttrReply> {
        trace!(ino, "getattr");
        let path = self.inodes.resolve(ino)?;
        self.attrs.attr_reply(&*self.store, ino, &path)
    }

    /// Apply each requested change in turn, stopping at the first failure,
    /// then return the refreshed attributes.
    pub fn set_attr(&self, ino: u64, changes: &SetAttrs) -> FsResult<AttrReply> {
        trace!(ino, ?changes, "setattr");
        let path = self.inodes.resolve(ino)?;

        if let Some(mode) = changes.mode {
            self.store.set_mode(&path, mode)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            self.store.set_owner(&path, changes.uid, changes.gid)?;
        }
        // Truncation bumps mtime, so it must precede the time update
        if let Some(size) = changes.size {
            self.store.truncate(&path, size)?;
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            self.store.set_times(&path, changes.atime, changes.mtime)?;
        }

        self.attrs.attr_reply(&*self.store, ino, &path)
    }

    /// Drop one inode from the cache.
    pub fn forget(&self, ino: u64) {
        trace!(ino, "forget");
        self.inodes.forget(ino);
    }

    /// Drop several inodes from the cache.
    pub fn batch_forget(&self, inos: &[u64]) {
        trace!(count = inos.len(), "batch_forget");
        for &ino in inos {
            self.inodes.forget(ino);
        }
    }

    // ===== Shape changes =====

    /// Create directory `name` under `parent`.
    pub fn mkdir(&self, parent: u64, name: &OsStr, mode: u32) -> FsResult<ChildEntry> {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), "mkdir");
        let dir = self.resolve_dir(parent)?;
        let path = child_path(&dir, name)?;

        self.store
            .mkdir(&path, mode)
            .map_err(|e| already_exists(e, name))?;
        self.enter_child(path)
    }

    /// Create a node. Only regular files are supported.
    pub fn mknod(&self, parent: u64, name: &OsStr, mode: u32) -> FsResult<ChildEntry> {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), "mknod");
        if mode & S_IFMT != S_IFREG {
            return Err(FsError::Unimplemented("mknod"));
        }
        let dir = self.resolve_dir(parent)?;
        let path = child_path(&dir, name)?;

        self.store
            .create_file(&path, mode)
            .map_err(|e| already_exists(e, name))?;
        self.enter_child(path)
    }

    /// Create regular file `name` under `parent` and open it.
    pub fn create_file(&self, parent: u64, name: &OsStr, mode: u32) -> FsResult<CreatedFile> {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), "create");
        let dir = self.resolve_dir(parent)?;
        let path = child_path(&dir, name)?;

        self.store
            .create_file(&path, mode)
            .map_err(|e| already_exists(e, name))?;
        let entry = self.enter_child(path)?;
        let handle = self.handles.allocate(entry.child);
        Ok(CreatedFile { entry, handle })
    }

    /// Stat a freshly created child, cache it and build its entry.
    fn enter_child(&self, path: PathBuf) -> FsResult<ChildEntry> {
        let stat = self.store.stat(&path)?;
        debug!(ino = stat.ino, path = %path.display(), "Created entry");
        self.inodes.record(stat.ino, path);
        Ok(self.attrs.child_entry(&stat))
    }

    /// Rename `old_name` under `old_parent` to `new_name` under `new_parent`,
    /// replacing the destination unless it is a non-empty directory.
    pub fn rename(
        &self,
        old_parent: u64,
        old_name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FsResult<()> {
        trace!(old_parent, old_name = ?old_name, new_parent, new_name = ?new_name, "rename");
        self.inodes.rebuild()?;

        let from = child_path(&self.inodes.get(old_parent).ok_or(FsError::NotFound)?, old_name)?;
        let to = child_path(&self.inodes.get(new_parent).ok_or(FsError::NotFound)?, new_name)?;

        match self.store.stat(&to) {
            Ok(dest) if dest.is_dir => {
                if !self.store.read_dir(&to)?.is_empty() {
                    return Err(FsError::NotEmpty(new_name.to_string_lossy().into_owned()));
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // rename(2) replaces the destination atomically
        self.store.rename(&from, &to)?;
        self.inodes.rename_prefix(&from, &to);
        Ok(())
    }

    /// Recursively remove `name` under `parent`.
    pub fn rmdir(&self, parent: u64, name: &OsStr) -> FsResult<()> {
        trace!(parent, name = ?name, "rmdir");
        let dir = self.inodes.resolve(parent)?;
        let path = child_path(&dir, name)?;
        self.store.remove_all(&path)?;
        Ok(())
    }

    // ===== Directory sessions =====

    /// Open a directory session on `ino`.
    pub fn open_dir(&self, ino: u64) -> FsResult<u64> {
        trace!(ino, "opendir");
        self.inodes.resolve(ino)?;
        Ok(self.handles.allocate(ino))
    }

    /// Serialize directory entries from `offset` into `dst`.
    pub fn read_dir(&self, ino: u64, fh: u64, offset: u64, dst: &mut [u8]) -> FsResult<ListingPage> {
        trace!(ino, fh, offset, len = dst.len(), "readdir");
        self.handles.check(fh, ino)?;
        let path = self.inodes.resolve(ino)?;

        let children = self.store.read_dir(&path)?;
        Ok(fill_listing(ino, &children, offset, dst))
    }

    /// End a directory session.
    pub fn release_dir_handle(&self, fh: u64) {
        trace!(fh, "releasedir");
        self.handles.release(fh);
    }

    // ===== File sessions =====

    /// Open a file session on `ino`.
    pub fn open_file(&self, ino: u64) -> FsResult<u64> {
        trace!(ino, "open");
        self.inodes.resolve(ino)?;
        Ok(self.handles.allocate(ino))
    }

    /// Positioned read into `dst`. Returns fewer bytes than `dst.len()` only
    /// at end of file.
    pub fn read_file(&self, ino: u64, fh: u64, offset: u64, dst: Option<&mut [u8]>) -> FsResult<usize> {
        trace!(ino, fh, offset, "read");
        self.handles.check(fh, ino)?;
        let path = self.inodes.resolve(ino)?;
        let dst = dst.ok_or(FsError::Unimplemented("vectored read"))?;

        Ok(self.store.read_at(&path, offset, dst)?)
    }

    /// Positioned write of all of `data`.
    pub fn write_file(&self, ino: u64, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        trace!(ino, fh, offset, len = data.len(), "write");
        self.handles.check(fh, ino)?;
        let path = self.inodes.resolve(ino)?;

        Ok(self.store.write_at(&path, offset, data)?)
    }

    /// Flush the file to durable storage.
    pub fn sync_file(&self, ino: u64, fh: u64) -> FsResult<()> {
        trace!(ino, fh, "fsync");
        self.handles.check(fh, ino)?;
        let path = self.inodes.resolve(ino)?;

        Ok(self.store.sync(&path)?)
    }

    /// Close-time flush. Identical to [`sync_file`](Self::sync_file).
    pub fn flush_file(&self, ino: u64, fh: u64) -> FsResult<()> {
        self.sync_file(ino, fh)
    }

    /// End a file session.
    pub fn release_file_handle(&self, fh: u64) {
        trace!(fh, "release");
        self.handles.release(fh);
    }

    // ===== Lifecycle =====

    /// Drop every live session.
    pub fn destroy(&self) {
        info!(
            handles = self.handles.len(),
            inodes = self.inodes.len(),
            "Filesystem destroyed"
        );
        self.handles.clear();
    }

    /// Error for an operation class the driver does not support.
    pub fn unsupported(&self, op: &'static str) -> FsError {
        debug!(op, "Unsupported operation");
        FsError::Unimplemented(op)
    }
}

impl<S: BackingStore> std::fmt::Debug for PassthroughFs<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughFs")
            .field("inodes", &self.inodes)
            .field("handles", &self.handles)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

/// Join a single-component child name onto `dir`.
fn child_path(dir: &Path, name: &OsStr) -> FsResult<PathBuf> {
    use std::os::unix::ffi::OsStrExt;

    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes == b"." || bytes == b".." || bytes.contains(&b'/') {
        return Err(FsError::InvalidName(name.to_string_lossy().into_owned()));
    }
    Ok(dir.join(name))
}

/// Map the backing store's "already exists" to [`FsError::AlreadyExists`].
fn already_exists(e: io::Error, name: &OsStr) -> FsError {
    if e.kind() == io::ErrorKind::AlreadyExists {
        FsError::AlreadyExists(name.to_string_lossy().into_owned())
    } else {
        FsError::Io(e)
    }
}
