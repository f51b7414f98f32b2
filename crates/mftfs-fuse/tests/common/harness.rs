//! Kernel mount harness for FUSE integration tests.
//!
//! [`TestMount`] mounts a temporary backing tree at a temporary mount point
//! and unmounts on drop.

use mftfs_fuse::{FuseBackend, FuseMountHandle, MountConfig};
use mftfs_mount::testing::TempTree;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A mounted backing tree.
pub struct TestMount {
    /// Unmounts on drop; declared first so it drops before the directories.
    handle: Option<FuseMountHandle>,
    /// Path where the tree is mounted.
    pub mount_path: PathBuf,
    /// The backing tree.
    pub backing: TempTree,
    _temp_mount: TempDir,
}

impl TestMount {
    /// Mount an empty backing tree.
    pub fn new() -> Result<Self, String> {
        Self::with_tree(TempTree::new())
    }

    /// Mount a pre-populated backing tree.
    pub fn with_tree(backing: TempTree) -> Result<Self, String> {
        let temp_mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");

        let config = MountConfig::default()
            .fs_name("mftfs-test")
            .ttl(Duration::from_secs(1));
        let handle = FuseBackend::with_timeouts(Duration::from_secs(5), Duration::from_millis(50))
            .mount(backing.path(), &mount_path, &config)
            .map_err(|e| format!("Failed to mount: {e}"))?;
        let mount_path = handle.mountpoint().to_path_buf();

        Ok(Self {
            handle: Some(handle),
            mount_path,
            backing,
            _temp_mount: temp_mount,
        })
    }

    /// Absolute path of `relative` inside the mount.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative)
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(path))
    }

    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        fs::write(self.path(path), content)
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.path(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    /// Sorted entry names under `path`.
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.path(path))?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Whether the mount is still live.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(FuseMountHandle::is_active)
    }

    /// Unmount explicitly.
    pub fn unmount(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unmount().expect("unmount failed");
        }
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
