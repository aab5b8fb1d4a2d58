//! Configuration validation

use crate::policy::{default_raw_jobs, default_raw_tiers};
use crate::schema::{RawCollector, RawConfig, RawJob, RawRemote, RawRetention, RawTier};
use powertier_util::{MAX_WINDOW_SECONDS, Resolution, WallClock, check_metric_name};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Tier '{tier}': {message}")]
    TierError { tier: String, message: String },

    #[error("Job '{job}': {message}")]
    JobError { job: String, message: String },

    #[error("Duplicate tier name: {0}")]
    DuplicateTier(String),

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("[{section}] missing credentials: {message}")]
    MissingCredential { section: String, message: String },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let tiers = config
        .tiers
        .clone()
        .unwrap_or_else(|| default_raw_tiers(config.remote.is_some()));
    let jobs = config.jobs.clone().unwrap_or_else(default_raw_jobs);

    if tiers.is_empty() {
        errors.push(ValidationError::GlobalError("at least one tier is required".into()));
    }

    if config.service.tick_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "tick_interval_seconds must be greater than 0".into(),
        ));
    }
    if config.service.max_attempts_per_day == Some(0) {
        errors.push(ValidationError::GlobalError(
            "max_attempts_per_day must be greater than 0".into(),
        ));
    }

    // Tier names and files must be unique
    let mut seen_names = HashSet::new();
    let mut seen_files = HashSet::new();
    for tier in &tiers {
        if !seen_names.insert(tier.name.as_str()) {
            errors.push(ValidationError::DuplicateTier(tier.name.clone()));
        }
        let file = tier_file_name(tier);
        if !seen_files.insert(file.clone()) {
            errors.push(ValidationError::TierError {
                tier: tier.name.clone(),
                message: format!("file '{}' is used by another tier", file),
            });
        }
    }

    for tier in &tiers {
        errors.extend(validate_tier(tier, config.remote.is_some()));
    }

    let tier_index: HashMap<&str, &RawTier> =
        tiers.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut seen_jobs = HashSet::new();
    for job in &jobs {
        if !seen_jobs.insert(job.name.as_str()) {
            errors.push(ValidationError::DuplicateJob(job.name.clone()));
        }
        errors.extend(validate_job(job, &tier_index, config.remote.is_some()));
    }

    if let Some(remote) = &config.remote {
        errors.extend(validate_remote(remote));
    }

    if let Some(collector) = &config.collector {
        errors.extend(validate_collector(collector));
    }

    errors
}

/// File name a tier persists to
pub(crate) fn tier_file_name(tier: &RawTier) -> String {
    tier.file
        .clone()
        .unwrap_or_else(|| format!("{}.json", tier.name))
}

fn validate_tier(tier: &RawTier, remote_configured: bool) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let err = |message: String| ValidationError::TierError {
        tier: tier.name.clone(),
        message,
    };

    if tier.name.trim().is_empty() {
        errors.push(err("name cannot be empty".into()));
    }

    let file = tier_file_name(tier);
    if file.contains('/') || file.contains('\\') || file.starts_with('.') {
        errors.push(err(format!("file '{}' must be a plain file name", file)));
    }

    let resolution = match parse_resolution(&tier.resolution) {
        Ok(r) => r,
        Err(e) => {
            errors.push(err(e));
            return errors;
        }
    };

    match (&tier.retention, resolution) {
        (RawRetention::SinceMidnight, Resolution::Raw) => {}
        (RawRetention::SinceMidnight, _) => {
            errors.push(err("since_midnight retention requires raw resolution".into()));
        }
        (RawRetention::Window { seconds: 0 }, _) => {
            errors.push(err("window must be longer than 0 seconds".into()));
        }
        (RawRetention::Window { seconds }, _) if *seconds > MAX_WINDOW_SECONDS => {
            errors.push(err(format!(
                "window of {} seconds exceeds the {} second limit",
                seconds, MAX_WINDOW_SECONDS
            )));
        }
        (RawRetention::Window { .. }, _) => {}
        (RawRetention::Periods { .. }, Resolution::Raw) => {
            errors.push(err("periods retention requires hour or day resolution".into()));
        }
        (RawRetention::Periods { max: 0 }, _) => {
            errors.push(err("periods retention must keep at least one period".into()));
        }
        (RawRetention::Periods { .. }, _) => {}
    }

    if let Some(remote_path) = &tier.remote_path {
        if remote_path.trim().is_empty() || remote_path.starts_with('/') {
            errors.push(err(format!("invalid remote_path '{}'", remote_path)));
        }
        if !remote_configured {
            errors.push(err("remote_path requires a [remote] section".into()));
        }
    }

    errors
}

fn validate_job(
    job: &RawJob,
    tiers: &HashMap<&str, &RawTier>,
    remote_configured: bool,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let err = |message: String| ValidationError::JobError {
        job: job.name.clone(),
        message,
    };

    if job.name.trim().is_empty() {
        errors.push(err("name cannot be empty".into()));
    }

    if let Err(e) = parse_time(&job.at) {
        errors.push(ValidationError::InvalidTimeFormat {
            value: job.at.clone(),
            message: e,
        });
    }

    let source = tiers.get(job.source.as_str());
    let target = tiers.get(job.target.as_str());

    if source.is_none() {
        errors.push(err(format!("unknown source tier '{}'", job.source)));
    }
    if target.is_none() {
        errors.push(err(format!("unknown target tier '{}'", job.target)));
    }

    if let (Some(source), Some(target)) = (source, target) {
        if !matches!(target.retention, RawRetention::Periods { .. }) {
            errors.push(err(format!(
                "target tier '{}' must use periods retention",
                target.name
            )));
        }

        if let (Ok(src_res), Ok(dst_res)) = (
            parse_resolution(&source.resolution),
            parse_resolution(&target.resolution),
        ) && src_res >= dst_res
        {
            errors.push(err(format!(
                "source '{}' ({}) must be finer than target '{}' ({})",
                source.name, src_res, target.name, dst_res
            )));
        }

        if job.sync == Some(true) {
            if target.remote_path.is_none() {
                errors.push(err(format!(
                    "sync requested but tier '{}' has no remote_path",
                    target.name
                )));
            }
            if !remote_configured {
                errors.push(err("sync requested but no [remote] section".into()));
            }
        }
    }

    errors
}

fn validate_remote(remote: &RawRemote) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let valid_repo = remote
        .repo
        .split_once('/')
        .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
    if !valid_repo {
        errors.push(ValidationError::GlobalError(format!(
            "remote.repo '{}' must be in owner/name form",
            remote.repo
        )));
    }

    if remote.timeout_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "remote.timeout_seconds must be greater than 0".into(),
        ));
    }

    if let Err(message) = resolve_token(remote.token.as_deref(), remote.token_env.as_deref()) {
        errors.push(ValidationError::MissingCredential {
            section: "remote".into(),
            message,
        });
    }

    errors
}

fn validate_collector(collector: &RawCollector) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !(collector.url.starts_with("http://") || collector.url.starts_with("https://")) {
        errors.push(ValidationError::GlobalError(format!(
            "collector.url '{}' must be an http(s) URL",
            collector.url
        )));
    }

    if collector.sensors.is_empty() {
        errors.push(ValidationError::GlobalError(
            "collector.sensors must map at least one metric to an entity".into(),
        ));
    }

    for metric in collector.sensors.keys() {
        if let Err(message) = check_metric_name(metric) {
            errors.push(ValidationError::GlobalError(format!("collector.sensors: {}", message)));
        }
    }

    if collector.interval_minutes == Some(0) {
        errors.push(ValidationError::GlobalError(
            "collector.interval_minutes must be greater than 0".into(),
        ));
    }

    if let Err(message) = resolve_token(collector.token.as_deref(), collector.token_env.as_deref())
    {
        errors.push(ValidationError::MissingCredential {
            section: "collector".into(),
            message,
        });
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<WallClock, String> {
    WallClock::parse(s).ok_or_else(|| "Expected HH:MM with hour 00-23 and minute 00-59".into())
}

/// Parse a tier resolution
pub fn parse_resolution(s: &str) -> Result<Resolution, String> {
    match s.to_lowercase().as_str() {
        "raw" => Ok(Resolution::Raw),
        "hour" | "hourly" => Ok(Resolution::Hour),
        "day" | "daily" => Ok(Resolution::Day),
        other => Err(format!("Unknown resolution: {}", other)),
    }
}

/// Resolve a token from an inline value or an environment variable
pub fn resolve_token(token: Option<&str>, token_env: Option<&str>) -> Result<String, String> {
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    match token_env {
        Some(var) => std::env::var(var)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| format!("environment variable {} is not set", var)),
        None => Err("set either token or token_env".into()),
    }
}
