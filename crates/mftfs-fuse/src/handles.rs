//! Open-handle table for FUSE file and directory sessions.
//!
//! Each open allocates a random 64-bit token bound to the inode it was
//! opened against. Every read, write, sync, flush and readdir presents the
//! token together with an inode; the pair must match exactly.

use crate::error::{FsError, FsResult};
use mftfs_mount::HandleTable;
use tracing::{debug, trace};

/// Maps session tokens to the inode they were opened against.
#[derive(Debug, Default)]
pub struct OpenHandleTable {
    inner: HandleTable<u64>,
}

impl OpenHandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table drawing tokens from `source` instead of the OS RNG.
    pub fn with_token_source<F>(source: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        Self {
            inner: HandleTable::with_token_source(source),
        }
    }

    /// Registers a new session against `ino` and returns its token.
    pub fn allocate(&self, ino: u64) -> u64 {
        let fh = self.inner.insert_random(ino);
        debug!(ino, fh, "Allocated handle");
        fh
    }

    /// Removes a session. Releasing an unknown token is not an error.
    pub fn release(&self, fh: u64) {
        if self.inner.remove(fh).is_none() {
            trace!(fh, "Released unknown handle");
        }
    }

    /// True only if `fh` is live and bound to exactly `ino`.
    pub fn validate(&self, fh: u64, ino: u64) -> bool {
        self.inner.get(fh) == Some(ino)
    }

    /// Like [`validate`](Self::validate), failing as [`FsError::NotFound`].
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if the pairing is invalid.
    pub fn check(&self, fh: u64, ino: u64) -> FsResult<()> {
        if self.validate(fh, ino) {
            Ok(())
        } else {
            trace!(fh, ino, "Handle does not match inode");
            Err(FsError::NotFound)
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drops every session.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_allocate_validate_release() {
        let handles = OpenHandleTable::new();
        let fh = handles.allocate(7);

        assert!(handles.validate(fh, 7));
        assert!(handles.check(fh, 7).is_ok());
        assert_eq!(handles.len(), 1);

        handles.release(fh);
        assert!(!handles.validate(fh, 7));
        assert!(handles.is_empty());
    }

    #[test]
    fn test_wrong_inode_is_rejected() {
        let handles = OpenHandleTable::new();
        let fh_a = handles.allocate(10);
        let _fh_b = handles.allocate(11);

        assert!(!handles.validate(fh_a, 11));
        assert!(matches!(handles.check(fh_a, 11), Err(FsError::NotFound)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let handles = OpenHandleTable::new();
        let fh = handles.allocate(1);
        handles.release(fh);
        handles.release(fh);
        handles.release(0xdead_beef);
        assert!(handles.is_empty());
    }

    #[test]
    fn test_colliding_tokens_are_redrawn() {
        // Source yields 5, 5, 9: the second allocation must skip the live 5
        let seq = Arc::new(AtomicU64::new(0));
        let handles = OpenHandleTable::with_token_source(move || {
            match seq.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => 5,
                _ => 9,
            }
        });

        assert_eq!(handles.allocate(1), 5);
        assert_eq!(handles.allocate(2), 9);
        assert!(handles.validate(5, 1));
        assert!(handles.validate(9, 2));
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let handles = Arc::new(OpenHandleTable::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let handles = Arc::clone(&handles);
                std::thread::spawn(move || (0..200).map(|_| handles.allocate(t)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for t in threads {
            for fh in t.join().unwrap() {
                assert!(seen.insert(fh), "duplicate handle {fh}");
            }
        }
        assert_eq!(seen.len(), 1600);
        assert_eq!(handles.len(), 1600);
    }

    #[test]
    fn test_clear_drops_everything() {
        let handles = OpenHandleTable::new();
        let fh = handles.allocate(3);
        handles.clear();
        assert!(!handles.validate(fh, 3));
    }
}
