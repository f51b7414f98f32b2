//! Shared building blocks for the mftfs passthrough filesystem.
//!
//! This crate holds the pieces of the driver that do not depend on the
//! FUSE transport: the random-token handle table, errno classification of
//! backing-store errors, and mount-point helpers.
//!
//! # Components
//!
//! - [`HandleTable`] - Thread-safe map from random 64-bit session tokens
//!   to values, with collision-retrying token generation
//! - [`io_error_to_errno`] - Maps `std::io::Error` to a POSIX errno
//! - [`prepare_mountpoint`] / [`is_mounted`] - Mount-point validation and
//!   readiness checks
//! - [`MountError`] - Error type for mount lifecycle operations
//!
//! # Example
//!
//! ```
//! use mftfs_mount::HandleTable;
//!
//! let handles: HandleTable<u64> = HandleTable::new();
//! let fh = handles.insert_random(42);
//! assert_eq!(handles.get(fh), Some(42));
//! assert_eq!(handles.remove(fh), Some(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error_category;
mod handle_table;
mod mount_utils;

pub use error_category::io_error_to_errno;
pub use handle_table::{random_handle_id, HandleTable};
pub use mount_utils::{is_mounted, prepare_mountpoint, MountError, DEFAULT_PROBE_TIMEOUT};

/// Testing utilities for driver integration tests.
///
/// Provides temporary backing trees, content generators and assertions
/// shared by the unit and integration tests of the driver crates.
pub mod testing;
