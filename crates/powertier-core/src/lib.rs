//! Core pipeline for powertierd
//!
//! This crate is the heart of powertierd, containing:
//! - Downsampling of a finer tier's completed periods into summaries
//! - The daily task scheduler (Pending -> Due -> Running -> Done, once per day)
//! - Aggregation jobs that downsample and then push replicated tiers
//! - Ingestion of readings into the raw tier
//! - The orchestrator that drives all of it from a timer tick

mod downsampler;
mod events;
mod ingest;
mod jobs;
mod orchestrator;
mod scheduler;

pub use downsampler::*;
pub use events::*;
pub use ingest::*;
pub use jobs::*;
pub use orchestrator::*;
pub use scheduler::*;

use powertier_remote::RemoteError;
use powertier_store::StoreError;
use thiserror::Error;

/// Errors from jobs and ingestion
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    #[error("Sync requested for {0} but no remote is configured")]
    NoRemote(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

pub type JobResult<T> = Result<T, JobError>;
