//! Events emitted by the scheduler and orchestrator

use chrono::NaiveDate;
use powertier_util::{JobName, TierName};

/// Events emitted on each tick
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Job ran successfully and is done for the day
    JobCompleted {
        job: JobName,
        run_date: NaiveDate,
        summaries: usize,
        pushed: bool,
    },

    /// Job attempt failed; it stays due
    JobFailed {
        job: JobName,
        run_date: NaiveDate,
        attempt: u32,
        error: String,
    },

    /// Job used up its attempts for today and waits for tomorrow
    JobExhausted {
        job: JobName,
        run_date: NaiveDate,
        attempts: u32,
    },

    /// Raw tier rotated at a day boundary
    TierRotated {
        tier: TierName,
        closed_day: NaiveDate,
        archived_points: usize,
    },
}
