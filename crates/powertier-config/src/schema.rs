//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Aggregation policy per metric
    #[serde(default)]
    pub metrics: RawMetrics,

    /// Tier definitions, finest first. Omitted means the built-in four tiers.
    pub tiers: Option<Vec<RawTier>>,

    /// Nightly jobs in execution order. Omitted means the built-in jobs.
    pub jobs: Option<Vec<RawJob>>,

    /// Remote object store (GitHub contents API)
    pub remote: Option<RawRemote>,

    /// Home Assistant poller
    pub collector: Option<RawCollector>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Directory holding the tier JSON files
    pub data_dir: Option<PathBuf>,

    /// SQLite database for schedule state, sync records and the audit log
    pub state_db: Option<PathBuf>,

    /// Scheduler polling interval
    pub tick_interval_seconds: Option<u64>,

    /// Failed attempts allowed per job per day before it waits for tomorrow
    pub max_attempts_per_day: Option<u32>,

    /// Restore missing remote-backed tiers from the remote store at startup
    pub fetch_on_startup: Option<bool>,
}

/// Metric aggregation settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMetrics {
    /// Monotonic counters summarized with max-of-period instead of mean
    pub counters: Option<Vec<String>>,

    /// If set, only these metrics are carried into summaries
    pub include: Option<Vec<String>>,

    /// Decimal places kept in summary values
    pub precision: Option<u32>,
}

/// Raw tier definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTier {
    pub name: String,

    /// File name in the data directory (default: `<name>.json`)
    pub file: Option<String>,

    pub retention: RawRetention,

    /// "raw", "hour" or "day"
    pub resolution: String,

    /// Path in the remote repository; presence makes the tier replicated
    pub remote_path: Option<String>,
}

/// Retention policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawRetention {
    SinceMidnight,
    Window { seconds: u64 },
    Periods { max: usize },
}

/// Raw job definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawJob {
    pub name: String,

    /// Time of day (HH:MM) at which the job becomes due
    pub at: String,

    /// Tier to read from
    pub source: String,

    /// Tier to append summaries to
    pub target: String,

    /// Push the target tier after aggregation (default: when the target is replicated)
    pub sync: Option<bool>,
}

/// Remote store settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRemote {
    /// API root (default: https://api.github.com)
    pub api_base: Option<String>,

    /// Repository as "owner/name"
    pub repo: String,

    /// Branch to read and commit to (default: main)
    pub branch: Option<String>,

    /// Access token (prefer token_env)
    pub token: Option<String>,

    /// Environment variable holding the access token
    pub token_env: Option<String>,

    /// Hard timeout for each request
    pub timeout_seconds: Option<u64>,

    /// Commit message prefix
    pub commit_message: Option<String>,
}

/// Home Assistant collector settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCollector {
    /// Home Assistant base URL
    pub url: String,

    /// Long-lived access token (prefer token_env)
    pub token: Option<String>,

    /// Environment variable holding the token
    pub token_env: Option<String>,

    /// Poll interval
    pub interval_minutes: Option<u64>,

    /// Hard timeout for each request
    pub timeout_seconds: Option<u64>,

    /// metric name -> entity id
    #[serde(default)]
    pub sensors: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tiers_and_jobs() {
        let toml_str = r#"
            config_version = 1

            [[tiers]]
            name = "daily"
            retention = { type = "since_midnight" }
            resolution = "raw"

            [[tiers]]
            name = "monthly"
            retention = { type = "periods", max = 30 }
            resolution = "day"
            remote_path = "data/monthly.json"

            [[jobs]]
            name = "monthly"
            at = "00:05"
            source = "daily"
            target = "monthly"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        let tiers = config.tiers.unwrap();
        assert_eq!(tiers.len(), 2);
        assert!(matches!(tiers[0].retention, RawRetention::SinceMidnight));
        assert!(matches!(tiers[1].retention, RawRetention::Periods { max: 30 }));
        assert_eq!(config.jobs.unwrap()[0].at, "00:05");
    }

    #[test]
    fn parse_collector_sensors() {
        let toml_str = r#"
            config_version = 1

            [collector]
            url = "http://homeassistant.local:8123"
            token_env = "HA_TOKEN"

            [collector.sensors]
            power = "sensor.house_power"
            daily_energy = "sensor.house_energy_today"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        let collector = config.collector.unwrap();
        assert_eq!(collector.sensors.len(), 2);
        assert_eq!(collector.sensors["power"], "sensor.house_power");
    }
}
