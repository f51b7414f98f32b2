//! Attribute translation from backing-store metadata.
//!
//! [`AttrTranslator`] stats a backing path and produces an
//! [`InodeAttributes`] record, stamping entry and attribute expirations at
//! `now + TTL`. Expirations are caching hints for the kernel only; the
//! driver never consults them.

use crate::backing::{BackingStore, PERMISSION_MASK, Stat};
use crate::config::MIN_TTL;
use crate::error::FsResult;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// File type bits of a mode.
pub const S_IFMT: u32 = 0o170_000;
/// Directory file type.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file type.
pub const S_IFREG: u32 = 0o100_000;
/// Symbolic link file type.
pub const S_IFLNK: u32 = 0o120_000;

/// Preferred I/O size reported for every node.
pub const BLOCK_SIZE: u32 = 4096;

/// Unit of the `blocks` field.
const SECTOR_SIZE: u64 = 512;

/// Node type as far as the driver distinguishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A directory.
    Directory,
    /// A regular file.
    RegularFile,
    /// A symbolic link (only seen when the backing store does not follow it).
    Symlink,
    /// Devices, FIFOs and sockets.
    Other,
}

impl FileKind {
    /// Classify a full `st_mode`.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::RegularFile,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }
}

/// Protocol-level attributes of one inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttributes {
    /// Protocol inode number (1 for the root).
    pub ino: u64,
    pub size: u64,
    /// 512-byte units.
    pub blocks: u64,
    /// Always 1: hard links are not modeled.
    pub nlink: u32,
    /// Full `st_mode`.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub blksize: u32,
}

impl InodeAttributes {
    /// Translate a backing stat for protocol inode `ino`.
    pub fn from_stat(ino: u64, stat: &Stat) -> Self {
        Self {
            ino,
            size: stat.size,
            blocks: stat.size.div_ceil(SECTOR_SIZE),
            nlink: 1,
            mode: stat.mode,
            uid: stat.uid,
            gid: stat.gid,
            atime: stat.atime,
            mtime: stat.mtime,
            ctime: stat.ctime,
            crtime: stat.crtime,
            blksize: BLOCK_SIZE,
        }
    }

    /// Node type.
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    /// Permission bits, including setuid/setgid/sticky.
    pub fn perm(&self) -> u16 {
        // Masked to 12 bits
        (self.mode & PERMISSION_MASK) as u16
    }
}

/// Attributes plus their expiration, as returned by getattr/setattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrReply {
    pub attributes: InodeAttributes,
    pub attr_expiration: SystemTime,
}

/// A resolved child, as returned by lookup/create/mkdir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    /// Child inode number.
    pub child: u64,
    pub attributes: InodeAttributes,
    pub attr_expiration: SystemTime,
    pub entry_expiration: SystemTime,
}

/// Produces attribute records with expiration stamps.
#[derive(Debug, Clone, Copy)]
pub struct AttrTranslator {
    entry_ttl: Duration,
    attr_ttl: Duration,
}

impl AttrTranslator {
    /// Creates a translator; TTLs below 1ms are raised to 1ms.
    pub fn new(entry_ttl: Duration, attr_ttl: Duration) -> Self {
        Self {
            entry_ttl: entry_ttl.max(MIN_TTL),
            attr_ttl: attr_ttl.max(MIN_TTL),
        }
    }

    /// Stat `path` and translate it as inode `ino`.
    ///
    /// # Errors
    ///
    /// The backing store's stat error, untranslated.
    pub fn fill<S: BackingStore>(&self, store: &S, ino: u64, path: &Path) -> FsResult<InodeAttributes> {
        let stat = store.stat(path)?;
        Ok(InodeAttributes::from_stat(ino, &stat))
    }

    /// Stat and stamp the attribute expiration.
    ///
    /// # Errors
    ///
    /// The backing store's stat error, untranslated.
    pub fn attr_reply<S: BackingStore>(&self, store: &S, ino: u64, path: &Path) -> FsResult<AttrReply> {
        let attributes = self.fill(store, ino, path)?;
        Ok(AttrReply {
            attributes,
            attr_expiration: self.attr_expiration(SystemTime::now()),
        })
    }

    /// Build a child entry from an already-taken stat, stamping both expirations.
    pub fn child_entry(&self, stat: &Stat) -> ChildEntry {
        let now = SystemTime::now();
        ChildEntry {
            child: stat.ino,
            attributes: InodeAttributes::from_stat(stat.ino, stat),
            attr_expiration: self.attr_expiration(now),
            entry_expiration: self.entry_expiration(now),
        }
    }

    /// `now + entry TTL`.
    pub fn entry_expiration(&self, now: SystemTime) -> SystemTime {
        now + self.entry_ttl
    }

    /// `now + attribute TTL`.
    pub fn attr_expiration(&self, now: SystemTime) -> SystemTime {
        now + self.attr_ttl
    }

    pub fn entry_ttl(&self) -> Duration {
        self.entry_ttl
    }

    pub fn attr_ttl(&self) -> Duration {
        self.attr_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::LocalStore;
    use mftfs_mount::testing::TempTree;
    use std::os::unix::fs::PermissionsExt;

    fn translator() -> AttrTranslator {
        AttrTranslator::new(Duration::from_secs(60), Duration::from_secs(60))
    }

    #[test]
    fn test_file_kind_from_mode() {
        assert_eq!(FileKind::from_mode(S_IFDIR | 0o755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(S_IFREG | 0o644), FileKind::RegularFile);
        assert_eq!(FileKind::from_mode(S_IFLNK | 0o777), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(0o010_000), FileKind::Other);
    }

    #[test]
    fn test_fill_regular_file() {
        let tree = TempTree::new().file("f", &[7u8; 1000]);
        std::fs::set_permissions(tree.join("f"), std::fs::Permissions::from_mode(0o640)).unwrap();

        let attrs = translator().fill(&LocalStore, 42, &tree.join("f")).unwrap();
        assert_eq!(attrs.ino, 42);
        assert_eq!(attrs.size, 1000);
        assert_eq!(attrs.blocks, 2);
        assert_eq!(attrs.nlink, 1);
        assert_eq!(attrs.kind(), FileKind::RegularFile);
        assert_eq!(attrs.perm(), 0o640);
        assert_eq!(attrs.blksize, BLOCK_SIZE);
    }

    #[test]
    fn test_fill_directory_has_one_link() {
        let tree = TempTree::new().dir("d/e");
        let attrs = translator().fill(&LocalStore, 5, &tree.join("d")).unwrap();
        assert_eq!(attrs.kind(), FileKind::Directory);
        assert_eq!(attrs.nlink, 1);
    }

    #[test]
    fn test_fill_missing_is_raw_not_found() {
        let tree = TempTree::new();
        let err = translator().fill(&LocalStore, 2, &tree.join("missing")).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_expirations_strictly_future() {
        let tr = AttrTranslator::new(Duration::ZERO, Duration::from_secs(60));
        let now = SystemTime::now();
        assert!(tr.entry_expiration(now) > now);
        assert_eq!(tr.attr_expiration(now), now + Duration::from_secs(60));
        assert_eq!(tr.entry_ttl(), MIN_TTL);
    }

    #[test]
    fn test_child_entry_stamps_both() {
        let tree = TempTree::new().file("f", b"x");
        let stat = LocalStore.stat(&tree.join("f")).unwrap();
        let before = SystemTime::now();

        let entry = translator().child_entry(&stat);
        assert_eq!(entry.child, stat.ino);
        assert_eq!(entry.attributes.ino, stat.ino);
        assert!(entry.entry_expiration > before);
        assert!(entry.attr_expiration > before);
    }
}
