//! Temporary backing trees for tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A backing directory tree that is deleted on drop.
///
/// Builder methods panic on I/O failure; this type only exists for tests.
///
/// # Example
///
/// ```
/// use mftfs_mount::testing::TempTree;
///
/// let tree = TempTree::new()
///     .dir("docs")
///     .file("docs/readme.txt", b"hello");
/// assert!(tree.path().join("docs/readme.txt").is_file());
/// ```
#[derive(Debug)]
pub struct TempTree {
    dir: TempDir,
}

impl TempTree {
    /// Create an empty backing tree.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp backing tree"),
        }
    }

    /// Root of the backing tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `rel` inside the tree.
    pub fn join(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Add a directory (and any missing parents).
    #[must_use]
    pub fn dir(self, rel: &str) -> Self {
        fs::create_dir_all(self.join(rel)).expect("failed to create directory");
        self
    }

    /// Add a file with the given content, creating missing parents.
    #[must_use]
    pub fn file(self, rel: &str, content: &[u8]) -> Self {
        let path = self.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directory");
        }
        fs::write(&path, content).expect("failed to write file");
        self
    }

    /// Read a file from the tree.
    pub fn read(&self, rel: &str) -> Vec<u8> {
        fs::read(self.join(rel)).expect("failed to read file")
    }

    /// On-disk inode number of `rel`.
    pub fn ino(&self, rel: &str) -> u64 {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(self.join(rel)).expect("failed to stat").ino()
    }

    /// Sorted names of the entries directly under `rel`.
    pub fn list(&self, rel: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.join(rel))
            .expect("failed to list directory")
            .map(|e| e.expect("bad entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

impl Default for TempTree {
    fn default() -> Self {
        Self::new()
    }
}
