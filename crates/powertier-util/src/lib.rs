//! Shared utilities for powertier
//!
//! This crate provides:
//! - Name types (TierName, JobName)
//! - Time utilities (mockable wall clock, local day boundaries)
//! - Tier vocabulary (retention, resolution, summary periods)
//! - Default paths for config, data, and state directories

mod ids;
mod paths;
mod tier;
mod time;

pub use ids::*;
pub use paths::*;
pub use tier::*;
pub use time::*;
