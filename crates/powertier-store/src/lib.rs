//! Persistence layer for powertier
//!
//! Provides:
//! - Tier files (JSON, rewritten atomically on every write)
//! - Schedule state (last run date per job)
//! - Sync records (last known remote SHA per tier)
//! - Maintenance flag
//! - Audit log (append-only)

mod audit;
mod reading;
mod sqlite;
mod tier_file;
mod tiered;
mod traits;

pub use audit::*;
pub use reading::*;
pub use sqlite::*;
pub use tier_file::*;
pub use tiered::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt tier file {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
