//! Validated settings structures

use crate::schema::{
    RawCollector, RawConfig, RawJob, RawMetrics, RawRemote, RawRetention, RawServiceConfig,
    RawTier,
};
use crate::validation::{parse_resolution, parse_time, resolve_token, tier_file_name};
use powertier_util::{
    JobName, Period, Resolution, Retention, StorageClass, TierName, TierSpec, WallClock,
    default_data_dir, default_state_db_path,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Validated settings passed explicitly into every component
#[derive(Debug, Clone)]
pub struct Settings {
    pub service: ServiceConfig,
    pub metrics: MetricPolicy,
    /// Tiers, finest first
    pub tiers: Vec<TierSpec>,
    /// Jobs in execution order
    pub jobs: Vec<JobSpec>,
    pub remote: Option<RemoteConfig>,
    pub collector: Option<CollectorConfig>,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let remote_configured = raw.remote.is_some();
        let raw_tiers = raw
            .tiers
            .unwrap_or_else(|| default_raw_tiers(remote_configured));
        let raw_jobs = raw.jobs.unwrap_or_else(default_raw_jobs);

        let tiers: Vec<TierSpec> = raw_tiers.into_iter().map(convert_tier).collect();
        let jobs = raw_jobs
            .into_iter()
            .filter_map(|j| convert_job(j, &tiers, remote_configured))
            .collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            metrics: MetricPolicy::from_raw(raw.metrics),
            tiers,
            jobs,
            remote: raw.remote.and_then(RemoteConfig::from_raw),
            collector: raw.collector.and_then(CollectorConfig::from_raw),
        }
    }

    /// Get tier by name
    pub fn tier(&self, name: &TierName) -> Option<&TierSpec> {
        self.tiers.iter().find(|t| &t.name == name)
    }

    /// The tier ingestion writes to: the first raw-resolution tier
    pub fn raw_tier(&self) -> Option<&TierSpec> {
        self.tiers.iter().find(|t| t.resolution == Resolution::Raw)
    }

    /// Get job by name
    pub fn job(&self, name: &JobName) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| &j.name == name)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub state_db: PathBuf,
    pub tick_interval: Duration,
    pub max_attempts_per_day: u32,
    pub fetch_on_startup: bool,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            state_db: raw.state_db.unwrap_or(defaults.state_db),
            tick_interval: raw
                .tick_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            max_attempts_per_day: raw
                .max_attempts_per_day
                .unwrap_or(defaults.max_attempts_per_day),
            fetch_on_startup: raw.fetch_on_startup.unwrap_or(defaults.fetch_on_startup),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            state_db: default_state_db_path(),
            tick_interval: Duration::from_secs(60),
            max_attempts_per_day: 5,
            fetch_on_startup: true,
        }
    }
}

/// How a metric is folded into a period summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationRule {
    /// Arithmetic mean of the period's samples
    Mean,
    /// Largest sample in the period; used for monotonically increasing counters
    Max,
}

/// Per-metric aggregation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPolicy {
    pub counters: BTreeSet<String>,
    /// None carries every metric seen in the source
    pub include: Option<BTreeSet<String>>,
    /// Decimal places kept in summary values
    pub precision: u32,
}

impl MetricPolicy {
    fn from_raw(raw: RawMetrics) -> Self {
        let defaults = Self::default();
        Self {
            counters: raw
                .counters
                .map(|c| c.into_iter().collect())
                .unwrap_or(defaults.counters),
            include: raw.include.map(|i| i.into_iter().collect()),
            precision: raw.precision.unwrap_or(defaults.precision),
        }
    }

    pub fn rule_for(&self, metric: &str) -> AggregationRule {
        if self.counters.contains(metric) {
            AggregationRule::Max
        } else {
            AggregationRule::Mean
        }
    }

    pub fn includes(&self, metric: &str) -> bool {
        self.include.as_ref().is_none_or(|set| set.contains(metric))
    }
}

impl Default for MetricPolicy {
    fn default() -> Self {
        Self {
            counters: BTreeSet::from(["daily_energy".to_string()]),
            include: None,
            precision: 2,
        }
    }
}

/// Validated nightly job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: JobName,
    pub at: WallClock,
    pub source: TierName,
    pub target: TierName,
    /// Bucket size, from the target tier's resolution
    pub period: Period,
    /// Summary count kept in the target tier
    pub max_periods: usize,
    /// Push the target tier after aggregating
    pub sync: bool,
}

/// Remote object store settings
#[derive(Clone)]
pub struct RemoteConfig {
    pub api_base: String,
    pub repo: String,
    pub branch: String,
    pub token: String,
    pub timeout: Duration,
    pub commit_message: String,
}

impl RemoteConfig {
    fn from_raw(raw: RawRemote) -> Option<Self> {
        let token = resolve_token(raw.token.as_deref(), raw.token_env.as_deref()).ok()?;
        Some(Self {
            api_base: raw
                .api_base
                .unwrap_or_else(|| "https://api.github.com".into())
                .trim_end_matches('/')
                .to_string(),
            repo: raw.repo,
            branch: raw.branch.unwrap_or_else(|| "main".into()),
            token,
            timeout: Duration::from_secs(raw.timeout_seconds.unwrap_or(10)),
            commit_message: raw.commit_message.unwrap_or_else(|| "Update".into()),
        })
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("api_base", &self.api_base)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("commit_message", &self.commit_message)
            .finish()
    }
}

/// Home Assistant collector settings
#[derive(Clone)]
pub struct CollectorConfig {
    pub url: String,
    pub token: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// metric name -> entity id
    pub sensors: BTreeMap<String, String>,
}

impl CollectorConfig {
    fn from_raw(raw: RawCollector) -> Option<Self> {
        let token = resolve_token(raw.token.as_deref(), raw.token_env.as_deref()).ok()?;
        Some(Self {
            url: raw.url.trim_end_matches('/').to_string(),
            token,
            interval: Duration::from_secs(raw.interval_minutes.unwrap_or(10) * 60),
            timeout: Duration::from_secs(raw.timeout_seconds.unwrap_or(10)),
            sensors: raw.sensors,
        })
    }
}

impl fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("sensors", &self.sensors)
            .finish()
    }
}

// Conversion helpers

fn convert_tier(raw: RawTier) -> TierSpec {
    let file = tier_file_name(&raw);
    let retention = match raw.retention {
        RawRetention::SinceMidnight => Retention::SinceMidnight,
        RawRetention::Window { seconds } => Retention::Window { seconds },
        RawRetention::Periods { max } => Retention::Periods { max },
    };
    let storage = match raw.remote_path {
        Some(remote_path) => StorageClass::Replicated { remote_path },
        None => StorageClass::Local,
    };

    TierSpec {
        name: TierName::new(raw.name),
        file,
        retention,
        resolution: parse_resolution(&raw.resolution).unwrap_or(Resolution::Raw),
        storage,
    }
}

fn convert_job(raw: RawJob, tiers: &[TierSpec], remote_configured: bool) -> Option<JobSpec> {
    let target = tiers.iter().find(|t| t.name.as_str() == raw.target)?;
    let period = target.resolution.period()?;
    let max_periods = match target.retention {
        Retention::Periods { max } => max,
        _ => return None,
    };
    let sync = raw
        .sync
        .unwrap_or(target.remote_path().is_some() && remote_configured);

    Some(JobSpec {
        name: JobName::new(raw.name),
        at: parse_time(&raw.at).ok()?,
        source: TierName::new(raw.source),
        target: target.name.clone(),
        period,
        max_periods,
        sync,
    })
}

/// Built-in tier set: raw day, hourly week, daily month, daily year
pub(crate) fn default_raw_tiers(remote_configured: bool) -> Vec<RawTier> {
    let remote = |path: &str| remote_configured.then(|| path.to_string());
    vec![
        RawTier {
            name: "daily".into(),
            file: None,
            retention: RawRetention::SinceMidnight,
            resolution: "raw".into(),
            remote_path: None,
        },
        RawTier {
            name: "weekly".into(),
            file: None,
            retention: RawRetention::Periods { max: 7 * 24 },
            resolution: "hour".into(),
            remote_path: None,
        },
        RawTier {
            name: "monthly".into(),
            file: None,
            retention: RawRetention::Periods { max: 30 },
            resolution: "day".into(),
            remote_path: remote("data/monthly.json"),
        },
        RawTier {
            name: "yearly".into(),
            file: None,
            retention: RawRetention::Periods { max: 365 },
            resolution: "day".into(),
            remote_path: remote("data/yearly.json"),
        },
    ]
}

/// Built-in nightly jobs, in the order they must run
pub(crate) fn default_raw_jobs() -> Vec<RawJob> {
    [("weekly", "00:02"), ("monthly", "00:05"), ("yearly", "00:15")]
        .into_iter()
        .map(|(name, at)| RawJob {
            name: name.into(),
            at: at.into(),
            source: "daily".into(),
            target: name.into(),
            sync: None,
        })
        .collect()
}
