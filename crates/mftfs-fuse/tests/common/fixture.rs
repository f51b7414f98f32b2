//! Handler-level fixture: a temporary backing tree driven directly through
//! [`PassthroughFs`], with no kernel mount involved.

use mftfs_fuse::{MountConfig, PassthroughFs};
use mftfs_mount::testing::TempTree;
use std::ffi::OsStr;

/// A backing tree plus the handlers serving it.
pub struct Fixture {
    pub tree: TempTree,
    pub fs: PassthroughFs,
}

impl Fixture {
    /// Serve an empty backing tree.
    pub fn new() -> Self {
        Self::with_tree(TempTree::new())
    }

    /// Serve a pre-populated backing tree.
    pub fn with_tree(tree: TempTree) -> Self {
        let fs = PassthroughFs::new(tree.path(), &MountConfig::default())
            .expect("failed to build passthrough filesystem");
        Self { tree, fs }
    }

    /// On-disk inode of `rel`, which is also its protocol inode.
    pub fn ino(&self, rel: &str) -> u64 {
        self.tree.ino(rel)
    }
}

/// Borrow a `&str` as a child name.
pub fn name(s: &str) -> &OsStr {
    OsStr::new(s)
}
