//! Thread-safe handle table keyed by random 64-bit tokens.
//!
//! Handles are opaque session tokens handed to the kernel on open and
//! presented back on every read/write/release. Tokens are drawn from 8
//! random bytes; a draw that collides with a live mapping (or yields the
//! reserved value 0) is discarded and redrawn.
//!
//! # Handle Lifecycle
//!
//! 1. **Insert**: [`HandleTable::insert_random`] draws a fresh token and
//!    registers the value under it
//! 2. **Get**: look up the value for a presented token
//! 3. **Remove**: drop the mapping on release (idempotent)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use tracing::trace;

/// Source of candidate handle tokens.
type TokenSource = Box<dyn Fn() -> u64 + Send + Sync>;

/// Draws a candidate handle token from 8 random bytes.
pub fn random_handle_id() -> u64 {
    u64::from_le_bytes(rand::random::<[u8; 8]>())
}

/// Thread-safe map from random handle tokens to values.
///
/// At most one live mapping exists per token. Check-and-insert happens on
/// a single `DashMap` shard entry, so concurrent inserts never hand out the
/// same token twice.
///
/// # Example
///
/// ```
/// use mftfs_mount::HandleTable;
///
/// let table: HandleTable<&str> = HandleTable::new();
/// let a = table.insert_random("a");
/// let b = table.insert_random("b");
/// assert_ne!(a, b);
/// assert_eq!(table.len(), 2);
/// ```
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_token: TokenSource,
}

impl<V> HandleTable<V> {
    /// Create an empty table drawing tokens from [`random_handle_id`].
    pub fn new() -> Self {
        Self::with_token_source(random_handle_id)
    }

    /// Create an empty table drawing tokens from a custom source.
    ///
    /// Used by tests to force collisions; production code uses [`new`](Self::new).
    pub fn with_token_source<F>(source: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        Self {
            handles: DashMap::new(),
            next_token: Box::new(source),
        }
    }

    /// Register `value` under a freshly drawn token and return the token.
    ///
    /// Redraws while the candidate is 0 or already mapped.
    pub fn insert_random(&self, value: V) -> u64 {
        loop {
            let token = (self.next_token)();
            if token == 0 {
                continue;
            }
            match self.handles.entry(token) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                    return token;
                }
                Entry::Occupied(_) => {
                    trace!(token, "handle token collision, redrawing");
                }
            }
        }
    }

    /// Remove a mapping and return its value. Unknown tokens return `None`.
    pub fn remove(&self, token: u64) -> Option<V> {
        self.handles.remove(&token).map(|(_, v)| v)
    }

    /// Check if a token currently has a live mapping.
    pub fn contains(&self, token: u64) -> bool {
        self.handles.contains_key(&token)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drop every live handle.
    pub fn clear(&self) {
        self.handles.clear();
    }
}

impl<V: Clone> HandleTable<V> {
    /// Clone out the value mapped to `token`.
    pub fn get(&self, token: u64) -> Option<V> {
        self.handles.get(&token).map(|v| v.value().clone())
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for HandleTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.handles.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_and_get() {
        let table: HandleTable<u64> = HandleTable::new();
        let token = table.insert_random(7);

        assert_ne!(token, 0);
        assert_eq!(table.get(token), Some(7));
        assert!(table.contains(token));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table: HandleTable<u64> = HandleTable::new();
        let token = table.insert_random(7);

        assert_eq!(table.remove(token), Some(7));
        assert_eq!(table.remove(token), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_unknown() {
        let table: HandleTable<u64> = HandleTable::new();
        assert!(table.remove(999).is_none());
    }

    #[test]
    fn test_collision_redraws() {
        // Sequence: 5, 5, 0, 6 - second insert must skip the live 5 and the reserved 0
        let draws = [5_u64, 5, 0, 6];
        let cursor = AtomicUsize::new(0);
        let table: HandleTable<&str> = HandleTable::with_token_source(move || {
            draws[cursor.fetch_add(1, Ordering::Relaxed) % draws.len()]
        });

        assert_eq!(table.insert_random("first"), 5);
        assert_eq!(table.insert_random("second"), 6);
        assert_eq!(table.get(5), Some("first"));
        assert_eq!(table.get(6), Some("second"));
    }

    #[test]
    fn test_token_reusable_after_remove() {
        let table: HandleTable<u64> = HandleTable::with_token_source(|| 42);

        assert_eq!(table.insert_random(1), 42);
        table.remove(42);
        assert_eq!(table.insert_random(2), 42);
        assert_eq!(table.get(42), Some(2));
    }

    #[test]
    fn test_clear() {
        let table: HandleTable<u64> = HandleTable::new();
        table.insert_random(1);
        table.insert_random(2);
        table.insert_random(3);
        assert_eq!(table.len(), 3);

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_insert_unique() {
        let table = Arc::new(HandleTable::<usize>::new());
        let mut workers = vec![];

        for i in 0..8 {
            let table = Arc::clone(&table);
            workers.push(thread::spawn(move || {
                (0..250)
                    .map(|j| table.insert_random(i * 250 + j))
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for worker in workers {
            for token in worker.join().unwrap() {
                assert!(seen.insert(token), "token {token} handed out twice");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(table.len(), 2000);
    }

    #[test]
    fn test_concurrent_insert_with_narrow_token_space() {
        // Only 64 possible tokens: forces collisions under contention
        let counter = Arc::new(AtomicUsize::new(0));
        let source_counter = Arc::clone(&counter);
        let table = Arc::new(HandleTable::<usize>::with_token_source(move || {
            (source_counter.fetch_add(7, Ordering::Relaxed) % 64) as u64 + 1
        }));
        let mut workers = vec![];

        for i in 0..4 {
            let table = Arc::clone(&table);
            workers.push(thread::spawn(move || {
                (0..16).map(|j| table.insert_random(i * 16 + j)).collect::<Vec<_>>()
            }));
        }

        let tokens: Vec<u64> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        let unique: HashSet<_> = tokens.iter().copied().collect();
        assert_eq!(unique.len(), 64);
        assert!(counter.load(Ordering::Relaxed) >= 64);
    }

    proptest! {
        #[test]
        fn prop_live_tokens_are_distinct(count in 1usize..200) {
            let table: HandleTable<usize> = HandleTable::new();
            let tokens: Vec<u64> = (0..count).map(|i| table.insert_random(i)).collect();
            let unique: HashSet<_> = tokens.iter().copied().collect();
            prop_assert_eq!(unique.len(), count);
            for (i, token) in tokens.iter().enumerate() {
                prop_assert_eq!(table.get(*token), Some(i));
            }
        }

        #[test]
        fn prop_remove_only_affects_target(count in 2usize..50, victim in 0usize..50) {
            let table: HandleTable<usize> = HandleTable::new();
            let tokens: Vec<u64> = (0..count).map(|i| table.insert_random(i)).collect();
            let victim = victim % count;

            table.remove(tokens[victim]);
            for (i, token) in tokens.iter().enumerate() {
                prop_assert_eq!(table.contains(*token), i != victim);
            }
        }
    }
}
