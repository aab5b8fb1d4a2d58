//! Aggregation jobs

use async_trait::async_trait;
use powertier_config::{JobSpec, Settings};
use powertier_remote::Replicator;
use powertier_store::TieredStore;
use powertier_util::{JobName, WallClock};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{Downsampler, Job, JobContext, JobError, JobReport, JobResult};

/// Summarizes every closed period the source tier still holds into the
/// target tier, then pushes the target if it syncs.
///
/// Periods come from the source data, so a run that comes days late still
/// covers every day it missed. Safe to re-run: summaries replace their
/// period's existing entry.
pub struct AggregationJob {
    spec: JobSpec,
    source: TieredStore,
    target: TieredStore,
    downsampler: Downsampler,
    replicator: Option<Arc<Replicator>>,
}

impl AggregationJob {
    pub fn new(
        spec: JobSpec,
        source: TieredStore,
        target: TieredStore,
        downsampler: Downsampler,
        replicator: Option<Arc<Replicator>>,
    ) -> Self {
        Self {
            spec,
            source,
            target,
            downsampler,
            replicator,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn target(&self) -> &TieredStore {
        &self.target
    }
}

#[async_trait]
impl Job for AggregationJob {
    fn name(&self) -> &JobName {
        &self.spec.name
    }

    fn at(&self) -> WallClock {
        self.spec.at
    }

    async fn run(&self, ctx: &JobContext) -> JobResult<JobReport> {
        // Make sure the closed day is in the archive even if nothing was
        // ingested since midnight
        self.source.rotate_if_boundary_crossed(ctx.now)?;

        let before = powertier_util::local_day_start(ctx.run_date);
        let summaries =
            self.downsampler
                .summarize_completed(&self.source, self.spec.period, before);

        let mut report = JobReport {
            summaries: summaries.len(),
            pushed: false,
        };

        if summaries.is_empty() {
            warn!(
                job = %self.spec.name,
                source = %self.source.name(),
                run_date = %ctx.run_date,
                "No data to aggregate"
            );
            return Ok(report);
        }

        self.downsampler
            .append_summaries(&self.target, summaries, self.spec.max_periods, ctx.now)?;

        if self.spec.sync {
            let replicator = self
                .replicator
                .as_ref()
                .ok_or_else(|| JobError::NoRemote(self.target.name().to_string()))?;
            replicator.push(&self.target, ctx.now).await?;
            report.pushed = true;
        }

        Ok(report)
    }
}

/// Tier store for every configured tier, in configuration order
pub fn build_tiers(settings: &Settings) -> Vec<TieredStore> {
    settings
        .tiers
        .iter()
        .map(|spec| TieredStore::new(&settings.service.data_dir, spec.clone()))
        .collect()
}

/// Aggregation job for every configured job, in configuration order
pub fn build_jobs(
    settings: &Settings,
    replicator: Option<Arc<Replicator>>,
) -> JobResult<Vec<Arc<AggregationJob>>> {
    let downsampler = Downsampler::new(settings.metrics.clone());
    let tier = |name: &powertier_util::TierName| {
        settings
            .tier(name)
            .map(|spec| TieredStore::new(&settings.service.data_dir, spec.clone()))
            .ok_or_else(|| JobError::UnknownTier(name.to_string()))
    };

    settings
        .jobs
        .iter()
        .map(|spec| {
            let job = AggregationJob::new(
                spec.clone(),
                tier(&spec.source)?,
                tier(&spec.target)?,
                downsampler.clone(),
                replicator.clone(),
            );
            info!(
                job = %spec.name,
                at = %spec.at,
                source = %spec.source,
                target = %spec.target,
                sync = spec.sync,
                "Job configured"
            );
            Ok(Arc::new(job))
        })
        .collect()
}
