//! Shared helpers for mftfs-fuse integration tests.

// Each test binary uses a different subset
#![allow(dead_code, unused_imports)]

pub mod fixture;
pub mod harness;

pub use fixture::*;
pub use harness::*;
