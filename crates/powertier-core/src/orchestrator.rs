//! Wires tiers, jobs, ingestion and replication together

use chrono::{DateTime, Local};
use powertier_config::Settings;
use powertier_remote::{PushOutcome, Replicator};
use powertier_store::{
    AuditEvent, AuditEventType, Rotation, StateStore, SyncRecord, TierFile, TieredStore,
};
use powertier_util::{JobName, TierName};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    Ingestor, JobError, JobReport, JobResult, JobStatus, SchedulerEvent, TaskScheduler,
    build_jobs, build_tiers,
};

/// Per-tier line of a status report
#[derive(Debug, Clone)]
pub struct TierStatus {
    pub name: TierName,
    pub points: usize,
    pub last_update: Option<DateTime<Local>>,
    pub remote_path: Option<String>,
    /// The file exists but could not be parsed
    pub corrupt: bool,
}

/// Everything `powertierd status` shows
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub tiers: Vec<TierStatus>,
    pub jobs: Vec<JobStatus>,
    pub sync_records: Vec<SyncRecord>,
    pub maintenance: bool,
    pub recent: Vec<AuditEvent>,
    pub store_healthy: bool,
}

/// Owns the scheduler and drives it from the service tick
pub struct Orchestrator {
    tiers: Vec<TieredStore>,
    scheduler: TaskScheduler,
    store: Arc<dyn StateStore>,
    replicator: Option<Arc<Replicator>>,
}

impl Orchestrator {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn StateStore>,
        replicator: Option<Arc<Replicator>>,
    ) -> JobResult<Self> {
        let tiers = build_tiers(settings);
        let mut scheduler = TaskScheduler::new(store.clone(), settings.service.max_attempts_per_day);
        for job in build_jobs(settings, replicator.clone())? {
            scheduler.register(job);
        }

        info!(
            tiers = tiers.len(),
            jobs = settings.jobs.len(),
            remote = replicator.as_ref().map(|r| r.describe()).unwrap_or_default(),
            "Orchestrator initialized"
        );
        let _ = store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            tier_count: tiers.len(),
            job_count: settings.jobs.len(),
        }));

        Ok(Self {
            tiers,
            scheduler,
            store,
            replicator,
        })
    }

    pub fn tiers(&self) -> &[TieredStore] {
        &self.tiers
    }

    pub fn tier(&self, name: &TierName) -> JobResult<&TieredStore> {
        self.tiers
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| JobError::UnknownTier(name.to_string()))
    }

    /// Tiers mirrored to the remote store
    pub fn replicated_tiers(&self) -> impl Iterator<Item = &TieredStore> {
        self.tiers.iter().filter(|t| t.spec().remote_path().is_some())
    }

    /// Ingestor for the first raw tier
    pub fn ingestor(&self) -> JobResult<Ingestor> {
        let raw = self
            .tiers
            .iter()
            .find(|t| t.spec().resolution == powertier_util::Resolution::Raw)
            .ok_or_else(|| JobError::UnknownTier("raw".into()))?;
        Ok(Ingestor::new(raw.clone(), self.store.clone()))
    }

    /// Rotate since-midnight tiers, then run due jobs
    pub async fn tick(&mut self, now: DateTime<Local>) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();

        for tier in &self.tiers {
            match tier.rotate_if_boundary_crossed(now) {
                Ok(Rotation::Rotated {
                    closed_day,
                    archived_points,
                }) => {
                    let _ = self.store.append_audit(AuditEvent::new(AuditEventType::TierRotated {
                        tier: tier.name().clone(),
                        closed_day,
                        archived_points,
                    }));
                    events.push(SchedulerEvent::TierRotated {
                        tier: tier.name().clone(),
                        closed_day,
                        archived_points,
                    });
                }
                Ok(Rotation::NotNeeded) => {}
                Err(e) => error!(tier = %tier.name(), error = %e, "Rotation failed"),
            }
        }

        events.extend(self.scheduler.tick(now).await);
        events
    }

    pub async fn run_once(&mut self, job: &JobName, now: DateTime<Local>) -> JobResult<JobReport> {
        self.scheduler.run_once(job, now).await
    }

    pub async fn run_all_once(
        &mut self,
        now: DateTime<Local>,
    ) -> Vec<(JobName, JobResult<JobReport>)> {
        self.scheduler.run_all_once(now).await
    }

    fn replicator(&self) -> JobResult<&Arc<Replicator>> {
        self.replicator
            .as_ref()
            .ok_or_else(|| JobError::NoRemote("any tier".into()))
    }

    pub async fn push(&self, tier: &TierName, now: DateTime<Local>) -> JobResult<PushOutcome> {
        let tier = self.tier(tier)?;
        Ok(self.replicator()?.push(tier, now).await?)
    }

    pub async fn pull(&self, tier: &TierName, now: DateTime<Local>) -> JobResult<Option<TierFile>> {
        let tier = self.tier(tier)?;
        Ok(self.replicator()?.pull(tier, now).await?)
    }

    pub fn sync_reset(&self, tier: &TierName) -> JobResult<bool> {
        self.tier(tier)?;
        Ok(self.replicator()?.reset(tier)?)
    }

    /// Pull every replicated tier whose local file is missing, empty or corrupt.
    ///
    /// Failures are logged and reported per tier; they never stop startup.
    pub async fn restore_missing(&self, now: DateTime<Local>) -> Vec<(TierName, JobResult<usize>)> {
        let Some(replicator) = &self.replicator else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for tier in self.replicated_tiers() {
            let needs_restore = match tier.try_load() {
                Ok(Some(file)) => file.is_empty(),
                Ok(None) => true,
                Err(e) => {
                    warn!(tier = %tier.name(), error = %e, "Local tier unreadable, restoring from remote");
                    true
                }
            };
            if !needs_restore {
                continue;
            }

            let result = match replicator.pull(tier, now).await {
                Ok(Some(file)) => {
                    info!(tier = %tier.name(), points = file.len(), "Tier restored from remote");
                    Ok(file.len())
                }
                Ok(None) => Ok(0),
                Err(e) => {
                    warn!(tier = %tier.name(), error = %e, "Tier restore failed");
                    Err(e.into())
                }
            };
            results.push((tier.name().clone(), result));
        }
        results
    }

    pub fn status(&self, now: DateTime<Local>, recent: usize) -> JobResult<StatusReport> {
        let tiers = self
            .tiers
            .iter()
            .map(|tier| {
                let (file, corrupt) = match tier.try_load() {
                    Ok(file) => (file.unwrap_or_default(), false),
                    Err(_) => (TierFile::default(), true),
                };
                TierStatus {
                    name: tier.name().clone(),
                    points: file.len(),
                    last_update: file.last_update,
                    remote_path: tier.spec().remote_path().map(String::from),
                    corrupt,
                }
            })
            .collect();

        Ok(StatusReport {
            tiers,
            jobs: self.scheduler.statuses(now)?,
            sync_records: self.store.list_sync_records()?,
            maintenance: self.store.is_maintenance()?,
            recent: self.store.get_recent_audits(recent)?,
            store_healthy: self.store.is_healthy(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use powertier_config::parse_config;
    use powertier_remote::MockRemoteStore;
    use powertier_store::{Reading, SqliteStore};

    fn setup(dir: &std::path::Path) -> (Orchestrator, Arc<MockRemoteStore>, Arc<SqliteStore>) {
        let settings = parse_config(&format!(
            "config_version = 1\n[service]\ndata_dir = \"{}\"\n[remote]\nrepo = \"me/power\"\ntoken = \"t\"\n",
            dir.display()
        ))
        .unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let remote = Arc::new(MockRemoteStore::new());
        let replicator = Arc::new(Replicator::new(remote.clone(), store.clone(), "Update"));
        let orchestrator = Orchestrator::new(&settings, store.clone(), Some(replicator)).unwrap();
        (orchestrator, remote, store)
    }

    #[tokio::test]
    async fn tick_rotates_then_runs_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, remote, _store) = setup(dir.path());
        let ingestor = orch.ingestor().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let midnight = powertier_util::local_day_start(day);

        for i in 0..144 {
            let ts = midnight + Duration::minutes(10 * i);
            let r = Reading::new(ts, [("power".to_string(), 300.0)].into_iter().collect());
            ingestor.ingest(r, ts).unwrap();
        }

        let next = midnight + Duration::days(1);
        let events = orch.tick(next).await;
        assert!(matches!(events[0], SchedulerEvent::TierRotated { archived_points: 144, .. }));
        assert_eq!(events.len(), 1);

        let events = orch.tick(next + Duration::minutes(20)).await;
        let completed = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::JobCompleted { .. }))
            .count();
        assert_eq!(completed, 3);
        assert!(remote.object("data/monthly.json").is_some());
        assert!(remote.object("data/yearly.json").is_some());

        let monthly = orch.tier(&TierName::new("monthly")).unwrap().load();
        assert_eq!(monthly.len(), 1);
        assert_eq!(orch.tier(&TierName::new("weekly")).unwrap().load().len(), 24);
    }

    #[tokio::test]
    async fn restore_pulls_only_missing_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, remote, store) = setup(dir.path());
        let content = br#"{"data_points": [{"timestamp": "2025-06-14T00:00:00Z", "power": 5.0}], "last_update": null}"#;
        remote.external_write("data/monthly.json", content);
        remote.external_write("data/yearly.json", content);

        // yearly already has local data
        let yearly = orch.tier(&TierName::new("yearly")).unwrap();
        let ts = Local.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        yearly
            .append(Reading::new(ts, [("power".to_string(), 1.0)].into_iter().collect()), ts)
            .unwrap();

        let results = orch.restore_missing(ts).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.as_str(), "monthly");
        assert_eq!(*results[0].1.as_ref().unwrap(), 1);
        assert!(store.get_sync_record(&TierName::new("monthly")).unwrap().is_some());
        assert_eq!(yearly.load().oldest().unwrap().get("power"), Some(1.0));
    }

    #[tokio::test]
    async fn status_reports_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _remote, store) = setup(dir.path());
        store.set_maintenance(true).unwrap();
        std::fs::write(dir.path().join("weekly.json"), "garbage").unwrap();

        let now = Local.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let status = orch.status(now, 5).unwrap();
        assert_eq!(status.tiers.len(), 4);
        assert!(status.tiers[1].corrupt);
        assert_eq!(status.jobs.len(), 3);
        assert!(status.maintenance);
        assert!(status.store_healthy);
        assert!(!status.recent.is_empty());
    }

    #[tokio::test]
    async fn unknown_tier_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _remote, _store) = setup(dir.path());
        let now = Local.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        assert!(matches!(
            orch.push(&TierName::new("hourly"), now).await,
            Err(JobError::UnknownTier(_))
        ));
    }
}
