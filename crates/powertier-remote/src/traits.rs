//! Remote store traits

use async_trait::async_trait;
use powertier_store::StoreError;
use thiserror::Error;

/// Errors from remote store operations
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote object changed since we last saw it
    #[error("Conflict on {path}: {message}")]
    Conflict { path: String, message: String },

    /// The remote object we expected to update no longer exists
    #[error("Remote object {path} disappeared")]
    Missing { path: String },

    #[error("Unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Tier {0} has no remote path")]
    NotReplicated(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RemoteError {
    /// Whether the remote copy diverged and needs an operator decision
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. } | RemoteError::Missing { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// An object fetched from the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub content: Vec<u8>,
    pub sha: String,
}

/// Path-addressed object store with content hashes
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch an object. `Ok(None)` when it does not exist.
    async fn get(&self, path: &str) -> RemoteResult<Option<RemoteObject>>;

    /// Create (`sha` = None) or update (`sha` = expected current hash) an object.
    ///
    /// Returns the new hash. Fails with `Conflict` if the object exists when
    /// creating or its hash differs when updating.
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> RemoteResult<String>;

    /// Short human-readable location, for logs
    fn describe(&self) -> String;
}
