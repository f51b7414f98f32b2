//! Mount lifecycle for the passthrough filesystem.
//!
//! Validates the backing root and mount point, builds the filesystem,
//! starts a `fuser` background session and waits until the mount is live.

use crate::config::MountConfig;
use crate::filesystem::MftFs;
use crate::ops::PassthroughFs;
use fuser::{BackgroundSession, MountOption};
use mftfs_mount::{DEFAULT_PROBE_TIMEOUT, MountError, is_mounted, prepare_mountpoint};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Timeout for graceful session.join() before forcing unmount.
/// The join thread may leak on timeout rather than block forever.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a mounted filesystem. Dropping it unmounts.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    /// Where the filesystem is mounted.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Whether the mount is still live (e.g. not unmounted externally).
    pub fn is_active(&self) -> bool {
        self.session.is_some() && is_mounted(&self.mountpoint, DEFAULT_PROBE_TIMEOUT)
    }

    /// Unmount and wait for the session to end.
    pub fn unmount(mut self) -> Result<(), MountError> {
        tracing::info!(mountpoint = %self.mountpoint.display(), "Unmounting filesystem");
        if let Some(session) = self.session.take() {
            // Blocks while files are open
            session.join();
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "Unmount complete");
        Ok(())
    }

    /// Lazy unmount through system tools, used when join is stuck.
    fn force_unmount_impl(&self) {
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .args(["-uz"])
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!("Unmounting filesystem at {}", self.mountpoint.display());

            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                session.join();
                let _ = tx.send(());
            });

            if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
                tracing::warn!(
                    "session.join() timed out after {:?} for {}, forcing unmount",
                    JOIN_TIMEOUT,
                    self.mountpoint.display()
                );
                self.force_unmount_impl();
            }
        }
    }
}

impl std::fmt::Debug for FuseMountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuseMountHandle")
            .field("mountpoint", &self.mountpoint)
            .field("session", &self.session.is_some())
            .finish()
    }
}

/// Mounts passthrough filesystems with `fuser`.
#[derive(Debug, Clone, Copy)]
pub struct FuseBackend {
    /// How long to wait for the mount to become live.
    pub mount_timeout: Duration,
    /// Poll interval while waiting.
    pub poll_interval: Duration,
}

impl Default for FuseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FuseBackend {
    /// Backend with default timeouts (10s mount, 50ms poll).
    pub fn new() -> Self {
        Self {
            mount_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Backend with custom timeouts.
    pub fn with_timeouts(mount_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            mount_timeout,
            poll_interval,
        }
    }

    /// Expose `backing_root` at `mountpoint`.
    pub fn mount(
        &self,
        backing_root: &Path,
        mountpoint: &Path,
        config: &MountConfig,
    ) -> Result<FuseMountHandle, MountError> {
        let root = validate_backing_root(backing_root)?;
        let mountpoint = prepare_mountpoint(mountpoint)?;
        if mountpoint.starts_with(&root) {
            return Err(MountError::InvalidMountpoint {
                path: mountpoint,
                reason: "inside the backing root".to_string(),
            });
        }

        let fs = PassthroughFs::new(&root, config)
            .map_err(|e| MountError::FilesystemCreation(e.to_string()))?;
        let fs = MftFs::new(fs, config);

        tracing::info!(
            root = %root.display(),
            mountpoint = %mountpoint.display(),
            workers = config.worker_threads,
            "Mounting passthrough filesystem"
        );
        let session = self.spawn_mount_with_timeout(fs, &mountpoint, &mount_options(config))?;
        let handle = FuseMountHandle {
            session: Some(session),
            mountpoint,
        };
        self.wait_for_mount(&handle.mountpoint)?;
        Ok(handle)
    }

    /// Poll until the mount point's device id differs from its parent's.
    fn wait_for_mount(&self, mountpoint: &Path) -> Result<(), MountError> {
        let deadline = Instant::now() + self.mount_timeout;
        while Instant::now() < deadline {
            if is_mounted(mountpoint, DEFAULT_PROBE_TIMEOUT) {
                tracing::debug!("Mount confirmed active at {}", mountpoint.display());
                return Ok(());
            }
            std::thread::sleep(self.poll_interval);
        }

        Err(MountError::Mount(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("Mount did not become ready within {:?}", self.mount_timeout),
        )))
    }

    /// Run spawn_mount2 on a helper thread so a mount syscall that blocks
    /// (e.g. on a stale mount) cannot hang the caller.
    fn spawn_mount_with_timeout(
        &self,
        fs: MftFs,
        mountpoint: &Path,
        options: &[MountOption],
    ) -> Result<BackgroundSession, MountError> {
        let mountpoint = mountpoint.to_path_buf();
        let options = options.to_vec();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let result = fuser::spawn_mount2(fs, &mountpoint, &options);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.mount_timeout) {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(MountError::Mount(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Mount(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mount operation timed out - the mountpoint may be on a stale FUSE mount",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::Mount(
                std::io::Error::other("Mount thread terminated unexpectedly"),
            )),
        }
    }
}

/// Mount with the default backend.
pub fn mount(
    backing_root: &Path,
    mountpoint: &Path,
    config: &MountConfig,
) -> Result<FuseMountHandle, MountError> {
    FuseBackend::new().mount(backing_root, mountpoint, config)
}

/// Canonicalize the backing root and require a directory.
pub fn validate_backing_root(path: &Path) -> Result<PathBuf, MountError> {
    let invalid = |reason: String| MountError::InvalidBackingRoot {
        path: path.to_path_buf(),
        reason,
    };
    let root = std::fs::canonicalize(path).map_err(|e| invalid(e.to_string()))?;
    let meta = std::fs::metadata(&root).map_err(|e| invalid(e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    Ok(root)
}

/// FUSE mount options for `config`.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype("mftfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}
