//! FUSE adapter over the operation handlers.
//!
//! [`MftFs`] implements [`fuser::Filesystem`]. Each callback converts its
//! arguments, moves the reply into a job and submits it to the
//! [`WorkerPool`]; the job calls the matching [`PassthroughFs`] handler and
//! answers the kernel. Cache-only operations (forget) run inline.
//!
//! Expirations produced by the handlers become reply TTLs here. A lookup
//! that finds nothing is answered as a negative entry (inode 0) so the
//! kernel caches the absence for the entry TTL.

use crate::attr::{FileKind, InodeAttributes};
use crate::backing::{BackingStore, LocalStore};
use crate::config::{MIN_TTL, MountConfig};
use crate::dirent::{EntryType, decode_dirents};
use crate::dispatch::WorkerPool;
use crate::ops::{PassthroughFs, SetAttrs};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Scratch buffer for one readdir page.
const READDIR_BUF_SIZE: usize = 4096;

/// FUSE filesystem exposing a backing directory tree.
pub struct MftFs<S: BackingStore = LocalStore> {
    fs: Arc<PassthroughFs<S>>,
    pool: WorkerPool,
}

impl<S: BackingStore> MftFs<S> {
    /// Wrap handlers and start the worker pool.
    pub fn new(fs: PassthroughFs<S>, config: &MountConfig) -> Self {
        Self {
            fs: Arc::new(fs),
            pool: WorkerPool::new(config.worker_threads, config.queue_capacity),
        }
    }

    /// The transport-independent handlers.
    pub fn handlers(&self) -> &Arc<PassthroughFs<S>> {
        &self.fs
    }

    /// Run `job` against the handlers on a worker thread.
    fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&PassthroughFs<S>) + Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        self.pool.submit(Box::new(move || job(&fs)));
    }
}

impl<S: BackingStore> std::fmt::Debug for MftFs<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MftFs")
            .field("fs", &self.fs)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Convert handler attributes to the fuser record.
pub fn to_file_attr(attrs: &InodeAttributes) -> FileAttr {
    FileAttr {
        ino: attrs.ino,
        size: attrs.size,
        blocks: attrs.blocks,
        atime: attrs.atime,
        mtime: attrs.mtime,
        ctime: attrs.ctime,
        crtime: attrs.crtime,
        kind: file_type(attrs.kind()),
        perm: attrs.perm(),
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: attrs.blksize,
        flags: 0,
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::RegularFile | FileKind::Other => FileType::RegularFile,
    }
}

fn entry_file_type(kind: EntryType) -> FileType {
    match kind {
        EntryType::Directory => FileType::Directory,
        EntryType::File => FileType::RegularFile,
    }
}

/// Attribute record of a negative entry.
fn negative_attr() -> FileAttr {
    FileAttr {
        ino: 0,
        size: 0,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: FileType::RegularFile,
        perm: 0,
        nlink: 0,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 0,
        flags: 0,
    }
}

/// Remaining lifetime of an expiration stamp, at least [`MIN_TTL`].
fn ttl_until(expiration: SystemTime) -> Duration {
    expiration
        .duration_since(SystemTime::now())
        .map_or(MIN_TTL, |ttl| ttl.max(MIN_TTL))
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::Now => SystemTime::now(),
        TimeOrNow::SpecificTime(t) => t,
    }
}

fn to_offset(offset: i64) -> u64 {
    u64::try_from(offset).unwrap_or(0)
}

impl<S: BackingStore> Filesystem for MftFs<S> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(root = %self.fs.inodes().root().display(), "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.pool.shutdown();
        self.fs.destroy();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        self.dispatch(move |fs| match fs.statfs() {
            Ok(st) => reply.statfs(
                st.blocks,
                st.blocks_free,
                st.blocks_available,
                st.inodes,
                st.inodes_free,
                st.block_size,
                st.name_max,
                st.io_size,
            ),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_owned();
        self.dispatch(move |fs| match fs.lookup(parent, &name) {
            Ok(Some(entry)) => {
                reply.entry(&ttl_until(entry.entry_expiration), &to_file_attr(&entry.attributes), 0);
            }
            Ok(None) => {
                reply.entry(&fs.attr_translator().entry_ttl(), &negative_attr(), 0);
            }
            Err(e) => {
                debug!(parent, name = ?name, error = %e, "lookup failed");
                reply.error(e.to_errno());
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        self.fs.forget(ino);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        let inos: Vec<u64> = nodes.iter().map(|node| node.nodeid).collect();
        self.fs.batch_forget(&inos);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.dispatch(move |fs| match fs.get_attr(ino) {
            Ok(r) => reply.attr(&ttl_until(r.attr_expiration), &to_file_attr(&r.attributes)),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = SetAttrs {
            mode,
            uid,
            gid,
            atime: atime.map(resolve_time),
            mtime: mtime.map(resolve_time),
            size,
        };
        self.dispatch(move |fs| match fs.set_attr(ino, &changes) {
            Ok(r) => reply.attr(&ttl_until(r.attr_expiration), &to_file_attr(&r.attributes)),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_owned();
        self.dispatch(move |fs| match fs.mknod(parent, &name, mode) {
            Ok(entry) => {
                reply.entry(&ttl_until(entry.entry_expiration), &to_file_attr(&entry.attributes), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_owned();
        self.dispatch(move |fs| match fs.mkdir(parent, &name, mode) {
            Ok(entry) => {
                reply.entry(&ttl_until(entry.entry_expiration), &to_file_attr(&entry.attributes), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name.to_owned();
        self.dispatch(move |fs| match fs.create_file(parent, &name, mode) {
            Ok(created) => reply.created(
                &ttl_until(created.entry.entry_expiration),
                &to_file_attr(&created.entry.attributes),
                0,
                created.handle,
                0,
            ),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_owned();
        let newname = newname.to_owned();
        self.dispatch(move |fs| match fs.rename(parent, &name, newparent, &newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_owned();
        self.dispatch(move |fs| match fs.rmdir(parent, &name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.dispatch(move |fs| match fs.open_dir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        self.dispatch(move |fs| {
            let mut buf = vec![0u8; READDIR_BUF_SIZE];
            match fs.read_dir(ino, fh, to_offset(offset), &mut buf) {
                Ok(page) => {
                    for entry in decode_dirents(&buf[..page.bytes_written]) {
                        let next = i64::try_from(entry.offset).unwrap_or(i64::MAX);
                        if reply.add(entry.ino, next, entry_file_type(entry.kind), &entry.name) {
                            break;
                        }
                    }
                    reply.ok();
                }
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.fs.release_dir_handle(fh);
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.dispatch(move |fs| match fs.open_file(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.dispatch(move |fs| {
            let mut buf = vec![0u8; size as usize];
            match fs.read_file(ino, fh, to_offset(offset), Some(&mut buf)) {
                Ok(n) => reply.data(&buf[..n]),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let data = data.to_vec();
        self.dispatch(move |fs| match fs.write_file(ino, fh, to_offset(offset), &data) {
            Ok(n) => reply.written(u32::try_from(n).unwrap_or(u32::MAX)),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        self.dispatch(move |fs| match fs.sync_file(ino, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        self.dispatch(move |fs| match fs.flush_file(ino, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.fs.release_file_handle(fh);
        reply.ok();
    }

    // ===== Unsupported =====

    fn readlink(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyData) {
        reply.error(self.fs.unsupported("readlink").to_errno());
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(self.fs.unsupported("symlink").to_errno());
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(self.fs.unsupported("link").to_errno());
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.fs.unsupported("unlink").to_errno());
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(self.fs.unsupported("getxattr").to_errno());
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.fs.unsupported("setxattr").to_errno());
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(self.fs.unsupported("listxattr").to_errno());
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.fs.unsupported("removexattr").to_errno());
    }

    fn fallocate(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _length: i64,
        _mode: i32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.fs.unsupported("fallocate").to_errno());
    }
}
