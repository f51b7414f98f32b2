//! Testing utilities for driver integration tests.
//!
//! This module provides shared test infrastructure for the driver core and
//! the FUSE adapter. It includes:
//!
//! - **Trees**: Temporary backing trees with a fluent builder
//! - **Generators**: Test content and awkward file names
//! - **Assertions**: Content verification with helpful error messages
//!
//! # Usage
//!
//! ```ignore
//! use mftfs_mount::testing::{TempTree, random_bytes, assert_bytes_equal};
//!
//! #[test]
//! fn test_passthrough_read() {
//!     let tree = TempTree::new().file("a.txt", b"hello").dir("sub");
//!     // ... build the driver over tree.path() and read back ...
//! }
//! ```

pub mod assertions;
pub mod generators;
pub mod tree;

pub use assertions::{assert_bytes_equal, assert_errno, assert_io_ok};
pub use generators::{random_bytes, special_filenames, unicode_filename};
pub use tree::TempTree;
