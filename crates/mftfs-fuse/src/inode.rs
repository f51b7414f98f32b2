//! Inode directory for the FUSE filesystem.
//!
//! Maps protocol inode numbers to backing paths. Inode numbers are the
//! backing store's own on-disk inode numbers, except the root which is
//! always [`ROOT_INODE`]. The map is built by a full breadth-first
//! traversal of the backing tree and is allowed to go stale: a miss
//! triggers one rebuild and one re-check, never more.
//!
//! Locking: the map sits behind a `RwLock` held only around map access.
//! Traversal I/O happens with no map lock held; the finished map is swapped
//! in at the end. Rebuilds are serialized by a separate gate so concurrent
//! misses share one traversal.

use crate::backing::BackingStore;
use crate::error::{FsError, FsResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Rebuildable inode -> backing path cache.
pub struct InodeDirectory<S> {
    store: Arc<S>,
    root: PathBuf,
    paths: RwLock<HashMap<u64, PathBuf>>,
    /// Held for the duration of a traversal.
    rebuild_gate: Mutex<()>,
    /// Bumped after every completed rebuild.
    generation: AtomicU64,
}

impl<S: BackingStore> InodeDirectory<S> {
    /// Creates an empty directory over `root`. Nothing is traversed until
    /// the first miss or an explicit [`rebuild`](Self::rebuild).
    pub fn new(store: Arc<S>, root: PathBuf) -> Self {
        Self {
            store,
            root,
            paths: RwLock::new(HashMap::new()),
            rebuild_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Creates the directory and performs the startup traversal.
    ///
    /// # Errors
    ///
    /// Fails if the backing root cannot be stat'ed or listed.
    pub fn build(store: Arc<S>, root: PathBuf) -> FsResult<Self> {
        let dir = Self::new(store, root);
        dir.rebuild()?;
        Ok(dir)
    }

    /// The backing root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache-only lookup. The root always resolves.
    pub fn get(&self, ino: u64) -> Option<PathBuf> {
        if ino == ROOT_INODE {
            return Some(self.root.clone());
        }
        self.paths.read().get(&ino).cloned()
    }

    /// Resolve an inode to its backing path, rebuilding once on a miss.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if the inode is still absent after the rebuild,
    /// or the rebuild's own error if the root could not be traversed.
    pub fn resolve(&self, ino: u64) -> FsResult<PathBuf> {
        // Read the generation before probing so a rebuild that lands in
        // between is not repeated.
        let seen = self.generation();
        if let Some(path) = self.get(ino) {
            return Ok(path);
        }

        trace!(ino, "Inode cache miss, rebuilding");
        self.rebuild_since(seen)?;
        self.get(ino).ok_or(FsError::NotFound)
    }

    /// Unconditionally re-traverse the backing tree and replace the map.
    ///
    /// # Errors
    ///
    /// Fails if the backing root cannot be stat'ed or listed.
    pub fn rebuild(&self) -> FsResult<()> {
        let _gate = self.rebuild_gate.lock();
        self.rebuild_locked()
    }

    /// Rebuild unless another rebuild completed after generation `seen`.
    fn rebuild_since(&self, seen: u64) -> FsResult<()> {
        let _gate = self.rebuild_gate.lock();
        if self.generation() != seen {
            trace!(seen, "Rebuild already completed by another handler");
            return Ok(());
        }
        self.rebuild_locked()
    }

    fn rebuild_locked(&self) -> FsResult<()> {
        let started = Instant::now();
        let fresh = self.scan()?;
        let entries = fresh.len();

        *self.paths.write() = fresh;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        debug!(
            entries,
            generation,
            elapsed_us = started.elapsed().as_micros(),
            "Rebuilt inode cache"
        );
        Ok(())
    }

    /// Breadth-first traversal recording `(on-disk inode) -> path`.
    fn scan(&self) -> io::Result<HashMap<u64, PathBuf>> {
        let root_stat = self.store.stat(&self.root)?;
        let mut map = HashMap::new();
        let mut visited = HashSet::from([root_stat.ino]);
        let mut queue = VecDeque::from([self.root.clone()]);

        while let Some(dir) = queue.pop_front() {
            let children = match self.store.read_dir(&dir) {
                Ok(children) => children,
                Err(e) if dir == self.root => return Err(e),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            for child in children {
                let path = dir.join(&child.name);
                // Removed or unreadable since the listing
                let stat = match self.store.stat(&path) {
                    Ok(stat) => stat,
                    Err(e) => {
                        trace!(path = %path.display(), error = %e, "Skipping child");
                        continue;
                    }
                };
                if stat.is_dir && visited.insert(stat.ino) {
                    queue.push_back(path.clone());
                }
                map.entry(stat.ino).or_insert(path);
            }
        }
        Ok(map)
    }

    /// Record a freshly discovered node.
    pub fn record(&self, ino: u64, path: PathBuf) {
        if ino == ROOT_INODE {
            return;
        }
        self.paths.write().insert(ino, path);
    }

    /// Drop one inode from the cache. Returns whether it was present.
    pub fn forget(&self, ino: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        self.paths.write().remove(&ino).is_some()
    }

    /// Rewrite every cached path at or below `from` to live below `to`.
    ///
    /// Entries already at or below `to` belonged to the node the rename
    /// replaced and are dropped; the next rebuild would drop them anyway.
    pub fn rename_prefix(&self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        let mut paths = self.paths.write();
        paths.retain(|_, path| !path.starts_with(to));
        for path in paths.values_mut() {
            if let Ok(rest) = path.strip_prefix(from) {
                *path = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
            }
        }
    }

    /// Number of cached entries (the root is not counted).
    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    /// Whether the cache holds no entries besides the root.
    pub fn is_empty(&self) -> bool {
        self.paths.read().is_empty()
    }

    /// Number of completed rebuilds.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl<S> std::fmt::Debug for InodeDirectory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeDirectory")
            .field("root", &self.root)
            .field("entries", &self.paths.read().len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
