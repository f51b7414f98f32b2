//! Passthrough FUSE filesystem.
//!
//! This crate exposes a directory tree on the local disk as a mountable
//! filesystem. Kernel requests are translated into ordinary file I/O
//! against the backing tree.
//!
//! # Components
//!
//! - [`InodeDirectory`] - rebuildable inode -> backing path cache
//! - [`OpenHandleTable`] - random session tokens bound to inodes
//! - [`AttrTranslator`] - backing metadata to attributes with expirations
//! - [`dirent`] - offset-addressable directory listing codec
//! - [`PassthroughFs`] - one handler per protocol operation
//! - [`MftFs`] - `fuser::Filesystem` adapter running handlers on a worker pool
//!
//! # Usage
//!
//! ```ignore
//! use mftfs_fuse::{MountConfig, mount};
//!
//! let handle = mount(backing_root, mountpoint, &MountConfig::default())?;
//! // ...
//! handle.unmount()?;
//! ```

pub mod attr;
pub mod backend;
pub mod backing;
pub mod config;
pub mod dirent;
pub mod dispatch;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod ops;

pub use attr::{AttrReply, AttrTranslator, ChildEntry, FileKind, InodeAttributes};
pub use backend::{FuseBackend, FuseMountHandle, mount};
pub use backing::{BackingStore, DirChild, LocalStore, Stat};
pub use config::MountConfig;
pub use error::{FsError, FsResult, ToErrno};
pub use filesystem::MftFs;
pub use handles::OpenHandleTable;
pub use inode::{InodeDirectory, ROOT_INODE};
pub use ops::{CreatedFile, PassthroughFs, SetAttrs, StatFs};
