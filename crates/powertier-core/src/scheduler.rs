//! Daily task scheduler
//!
//! Each job becomes due once per local day at its wall-clock time and is
//! marked done by persisting the run date. A job that fails stays due and is
//! retried on later ticks, up to a per-day attempt cap.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use powertier_store::{AuditEvent, AuditEventType, StateStore};
use powertier_util::{JobName, WallClock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{JobError, JobResult, SchedulerEvent};

/// Inputs a job run may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    /// Logical day the run belongs to; period bounds derive from this
    pub run_date: NaiveDate,
    pub now: DateTime<Local>,
}

/// What a successful run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobReport {
    pub summaries: usize,
    pub pushed: bool,
}

/// A unit of daily work
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &JobName;

    /// Local time of day from which the job is due
    fn at(&self) -> WallClock;

    async fn run(&self, ctx: &JobContext) -> JobResult<JobReport>;
}

/// Per-day lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not yet time today
    Pending,
    /// Time has passed and today's run has not succeeded
    Due,
    /// Currently executing
    Running,
    /// Succeeded today
    Done,
}

/// Snapshot of one job for status output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: JobName,
    pub at: WallClock,
    pub state: JobState,
    pub last_run: Option<NaiveDate>,
    pub attempts_today: u32,
    pub exhausted: bool,
}

/// Runs registered jobs in declared order, at most once per day each
pub struct TaskScheduler {
    jobs: Vec<Arc<dyn Job>>,
    store: Arc<dyn StateStore>,
    max_attempts_per_day: u32,
    /// Failed attempts per job for one day; not persisted
    attempts: HashMap<JobName, (NaiveDate, u32)>,
    running: Option<JobName>,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn StateStore>, max_attempts_per_day: u32) -> Self {
        Self {
            jobs: Vec::new(),
            store,
            max_attempts_per_day: max_attempts_per_day.max(1),
            attempts: HashMap::new(),
            running: None,
        }
    }

    /// Add a job; jobs run in registration order
    pub fn register(&mut self, job: Arc<dyn Job>) {
        debug!(job = %job.name(), at = %job.at(), "Job registered");
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<JobName> {
        self.jobs.iter().map(|j| j.name().clone()).collect()
    }

    /// Current state of a job; last run date is re-read from the store every call
    pub fn state(&self, job: &dyn Job, now: DateTime<Local>) -> JobResult<JobState> {
        if self.running.as_ref() == Some(job.name()) {
            return Ok(JobState::Running);
        }

        let last_run = self.store.get_last_run(job.name())?;
        Ok(if last_run == Some(now.date_naive()) {
            JobState::Done
        } else if job.at().has_passed(&now) {
            JobState::Due
        } else {
            JobState::Pending
        })
    }

    fn attempts_on(&self, job: &JobName, day: NaiveDate) -> u32 {
        match self.attempts.get(job) {
            Some((d, n)) if *d == day => *n,
            _ => 0,
        }
    }

    fn exhausted(&self, job: &JobName, day: NaiveDate) -> bool {
        self.attempts_on(job, day) >= self.max_attempts_per_day
    }

    pub fn statuses(&self, now: DateTime<Local>) -> JobResult<Vec<JobStatus>> {
        let today = now.date_naive();
        self.jobs
            .iter()
            .map(|job| {
                Ok(JobStatus {
                    name: job.name().clone(),
                    at: job.at(),
                    state: self.state(job.as_ref(), now)?,
                    last_run: self.store.get_last_run(job.name())?,
                    attempts_today: self.attempts_on(job.name(), today),
                    exhausted: self.exhausted(job.name(), today),
                })
            })
            .collect()
    }

    /// Run every due job, in order. One job failing does not stop the others.
    pub async fn tick(&mut self, now: DateTime<Local>) -> Vec<SchedulerEvent> {
        let today = now.date_naive();
        let mut events = Vec::new();

        for job in self.jobs.clone() {
            match self.state(job.as_ref(), now) {
                Ok(JobState::Due) => {}
                Ok(_) => continue,
                Err(e) => {
                    error!(job = %job.name(), error = %e, "Cannot read schedule state, skipping this tick");
                    continue;
                }
            }

            if self.exhausted(job.name(), today) {
                continue;
            }

            let (result, event) = self.execute(job.as_ref(), now, true).await;
            events.push(event);
            if result.is_err() && self.exhausted(job.name(), today) {
                let attempts = self.attempts_on(job.name(), today);
                warn!(
                    job = %job.name(),
                    attempts,
                    "Job out of attempts for today, waiting for tomorrow"
                );
                events.push(SchedulerEvent::JobExhausted {
                    job: job.name().clone(),
                    run_date: today,
                    attempts,
                });
            }
        }

        events
    }

    /// Run a job now regardless of its state; success marks it done for today
    pub async fn run_once(&mut self, name: &JobName, now: DateTime<Local>) -> JobResult<JobReport> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name() == name)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob(name.to_string()))?;

        info!(job = %name, "Running job on request");
        self.execute(job.as_ref(), now, false).await.0
    }

    /// `run_once` for every job in declared order, continuing past failures
    pub async fn run_all_once(&mut self, now: DateTime<Local>) -> Vec<(JobName, JobResult<JobReport>)> {
        let mut results = Vec::new();
        for name in self.job_names() {
            let result = self.run_once(&name, now).await;
            results.push((name, result));
        }
        results
    }

    async fn execute(
        &mut self,
        job: &dyn Job,
        now: DateTime<Local>,
        count_failure: bool,
    ) -> (JobResult<JobReport>, SchedulerEvent) {
        let name = job.name().clone();
        let ctx = JobContext {
            run_date: now.date_naive(),
            now,
        };

        self.running = Some(name.clone());
        info!(job = %name, run_date = %ctx.run_date, "Job started");
        let result = job.run(&ctx).await;
        self.running = None;

        match result {
            Ok(report) => {
                if let Err(e) = self.store.set_last_run(&name, ctx.run_date, now) {
                    // Next tick will run it again; jobs are idempotent per run date
                    error!(job = %name, error = %e, "Failed to persist job completion");
                }
                self.attempts.remove(&name);
                let _ = self.store.append_audit(AuditEvent::new(AuditEventType::JobCompleted {
                    job: name.clone(),
                    run_date: ctx.run_date,
                    summaries: report.summaries,
                }));
                info!(
                    job = %name,
                    summaries = report.summaries,
                    pushed = report.pushed,
                    "Job completed"
                );
                (
                    Ok(report),
                    SchedulerEvent::JobCompleted {
                        job: name,
                        run_date: ctx.run_date,
                        summaries: report.summaries,
                        pushed: report.pushed,
                    },
                )
            }
            Err(e) => {
                let attempt = if count_failure {
                    let entry = self.attempts.entry(name.clone()).or_insert((ctx.run_date, 0));
                    if entry.0 != ctx.run_date {
                        *entry = (ctx.run_date, 0);
                    }
                    entry.1 += 1;
                    entry.1
                } else {
                    self.attempts_on(&name, ctx.run_date)
                };

                let _ = self.store.append_audit(AuditEvent::new(AuditEventType::JobFailed {
                    job: name.clone(),
                    run_date: ctx.run_date,
                    attempt,
                    error: e.to_string(),
                }));
                error!(job = %name, attempt, error = %e, "Job failed");

                let event = SchedulerEvent::JobFailed {
                    job: name,
                    run_date: ctx.run_date,
                    attempt,
                    error: e.to_string(),
                };
                (Err(e), event)
            }
        }
    }
}
