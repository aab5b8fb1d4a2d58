//! Remote object store access for powertier
//!
//! This crate provides:
//! - The `RemoteStore` trait (path-addressed objects with content SHAs)
//! - A GitHub contents API implementation
//! - A mock store for tests
//! - `Replicator`, which pushes and pulls tier files with SHA-conditioned writes

mod github;
mod mock;
mod replicator;
mod traits;

pub use github::*;
pub use mock::*;
pub use replicator::*;
pub use traits::*;
