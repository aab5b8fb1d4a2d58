//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use powertier_util::{JobName, TierName};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configuration loaded
    ConfigLoaded { tier_count: usize, job_count: usize },

    /// Raw tier cleared at a day boundary
    TierRotated {
        tier: TierName,
        closed_day: NaiveDate,
        archived_points: usize,
    },

    /// Reading written to the raw tier
    ReadingIngested { tier: TierName, metrics: usize },

    /// Reading dropped because maintenance mode is on
    ReadingSkipped { reason: String },

    /// Job finished successfully
    JobCompleted {
        job: JobName,
        run_date: NaiveDate,
        summaries: usize,
    },

    /// Job attempt failed
    JobFailed {
        job: JobName,
        run_date: NaiveDate,
        attempt: u32,
        error: String,
    },

    /// Tier uploaded to the remote store
    RemotePushed {
        tier: TierName,
        remote_path: String,
        sha: String,
    },

    /// Tier downloaded from the remote store
    RemotePulled {
        tier: TierName,
        remote_path: String,
        sha: String,
    },

    /// Remote copy changed underneath us; nothing was written
    RemoteConflict {
        tier: TierName,
        remote_path: String,
        message: String,
    },

    /// Operator discarded the sync record
    SyncReset { tier: TierName },

    /// Maintenance mode toggled
    MaintenanceToggled { enabled: bool },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: powertier_util::now(),
            event,
        }
    }
}
