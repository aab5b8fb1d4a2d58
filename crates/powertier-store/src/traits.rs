//! Store trait definitions

use chrono::{DateTime, Local, NaiveDate};
use powertier_util::{JobName, TierName};
use serde::{Deserialize, Serialize};

use crate::{AuditEvent, StoreResult};

/// Durable service state: schedule, sync records, flags and the audit log
pub trait StateStore: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Schedule state

    /// Date of the job's last successful run
    fn get_last_run(&self, job: &JobName) -> StoreResult<Option<NaiveDate>>;

    /// Record a successful run for the given logical date
    fn set_last_run(
        &self,
        job: &JobName,
        date: NaiveDate,
        at: DateTime<Local>,
    ) -> StoreResult<()>;

    /// All recorded job runs
    fn list_job_runs(&self) -> StoreResult<Vec<JobRun>>;

    // Sync records

    fn get_sync_record(&self, tier: &TierName) -> StoreResult<Option<SyncRecord>>;

    fn put_sync_record(&self, record: &SyncRecord) -> StoreResult<()>;

    /// Forget the remote SHA for a tier. Returns whether a record existed.
    fn clear_sync_record(&self, tier: &TierName) -> StoreResult<bool>;

    fn list_sync_records(&self) -> StoreResult<Vec<SyncRecord>>;

    // Flags

    /// Whether ingestion is paused
    fn is_maintenance(&self) -> StoreResult<bool>;

    fn set_maintenance(&self, enabled: bool) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Last successful run of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub job: JobName,
    pub last_run: NaiveDate,
    pub completed_at: DateTime<Local>,
}

/// What this host last knew about a tier's remote copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub tier: TierName,
    pub remote_path: String,
    pub last_known_sha: String,
    pub synced_at: DateTime<Local>,
}
