//! Period summaries

use chrono::{DateTime, Local};
use powertier_config::{AggregationRule, MetricPolicy};
use powertier_store::{Reading, StoreResult, TieredStore};
use powertier_util::{Period, PeriodBounds};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Folds a finer tier's readings into one summary per period
#[derive(Debug, Clone)]
pub struct Downsampler {
    policy: MetricPolicy,
}

/// What an [`Downsampler::append_summaries`] call changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendReport {
    pub added: usize,
    pub replaced: usize,
    pub evicted: usize,
    pub total: usize,
}

impl Downsampler {
    pub fn new(policy: MetricPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MetricPolicy {
        &self.policy
    }

    /// One summary per `period` that `source` holds data for and that ended
    /// at or before `before`, oldest first. Periods without data yield nothing.
    pub fn summarize_completed(
        &self,
        source: &TieredStore,
        period: Period,
        before: DateTime<Local>,
    ) -> Vec<Reading> {
        let readings = source.readings_before(before);
        period
            .completed_periods(readings.iter().map(|r| &r.timestamp), before)
            .iter()
            .filter_map(|bounds| summarize(&readings, bounds, &self.policy))
            .collect()
    }

    /// Append one summary to `target`, keeping at most `max_periods` entries
    pub fn append_summary(
        &self,
        target: &TieredStore,
        summary: Reading,
        max_periods: usize,
        now: DateTime<Local>,
    ) -> StoreResult<AppendReport> {
        self.append_summaries(target, vec![summary], max_periods, now)
    }

    /// Append summaries in one write.
    ///
    /// A summary for a period already present replaces it, so re-running a
    /// job for the same day never duplicates entries. Oldest entries are
    /// dropped beyond `max_periods`.
    pub fn append_summaries(
        &self,
        target: &TieredStore,
        summaries: Vec<Reading>,
        max_periods: usize,
        now: DateTime<Local>,
    ) -> StoreResult<AppendReport> {
        let mut file = target.load();
        let mut report = AppendReport::default();

        for summary in summaries {
            if file.upsert(summary) {
                report.replaced += 1;
            } else {
                report.added += 1;
            }
        }

        let before = file.len();
        file.trim_to(max_periods);
        report.evicted = before - file.len();
        report.total = file.len();
        file.last_update = Some(now);
        target.save(&file)?;

        info!(
            tier = %target.name(),
            added = report.added,
            replaced = report.replaced,
            evicted = report.evicted,
            total = report.total,
            "Summaries appended"
        );
        Ok(report)
    }
}

/// Fold readings in `[bounds.start, bounds.end)` into one reading stamped at the period start.
///
/// Counters take the period maximum; every other metric takes the mean over
/// the readings that carry it. Values are rounded to the policy's precision.
pub fn summarize(readings: &[Reading], bounds: &PeriodBounds, policy: &MetricPolicy) -> Option<Reading> {
    let mut samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for reading in readings.iter().filter(|r| bounds.contains(&r.timestamp)) {
        for (metric, value) in &reading.values {
            if policy.includes(metric) && value.is_finite() {
                samples.entry(metric.as_str()).or_default().push(*value);
            }
        }
    }

    if samples.is_empty() {
        debug!(start = %bounds.start, end = %bounds.end, "No data in period");
        return None;
    }

    let values = samples
        .into_iter()
        .map(|(metric, values)| {
            let folded = match policy.rule_for(metric) {
                AggregationRule::Mean => values.iter().sum::<f64>() / values.len() as f64,
                AggregationRule::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            (metric.to_string(), round_to(folded, policy.precision))
        })
        .collect();

    Some(Reading::new(bounds.start, values))
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use powertier_util::{Period, Resolution, Retention, StorageClass, TierName, TierSpec};

    fn bounds() -> PeriodBounds {
        PeriodBounds {
            start: Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
            end: Local.with_ymd_and_hms(2025, 6, 15, 11, 0, 0).unwrap(),
        }
    }

    fn reading(minute: i64, values: &[(&str, f64)]) -> Reading {
        Reading::new(
            bounds().start + Duration::minutes(minute),
            values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    fn tier(dir: &std::path::Path, name: &str, retention: Retention, resolution: Resolution) -> TieredStore {
        TieredStore::new(
            dir,
            TierSpec {
                name: TierName::new(name),
                file: format!("{}.json", name),
                retention,
                resolution,
                storage: StorageClass::Local,
            },
        )
    }

    #[test]
    fn mean_and_counter_max() {
        let readings = vec![
            reading(0, &[("power", 100.0), ("daily_energy", 1.2)]),
            reading(20, &[("power", 200.0), ("daily_energy", 1.5)]),
            reading(40, &[("power", 301.0), ("daily_energy", 1.9)]),
        ];

        let summary = summarize(&readings, &bounds(), &MetricPolicy::default()).unwrap();
        assert_eq!(summary.timestamp, bounds().start);
        assert_eq!(summary.get("power"), Some(200.33));
        assert_eq!(summary.get("daily_energy"), Some(1.9));
    }

    #[test]
    fn empty_period_is_no_data() {
        let outside = vec![reading(60, &[("power", 1.0)]), reading(-1, &[("power", 1.0)])];
        assert!(summarize(&[], &bounds(), &MetricPolicy::default()).is_none());
        assert!(summarize(&outside, &bounds(), &MetricPolicy::default()).is_none());
    }

    #[test]
    fn metrics_missing_from_some_readings() {
        let readings = vec![
            reading(0, &[("power", 100.0), ("solar", 10.0)]),
            reading(30, &[("power", 200.0)]),
        ];
        let summary = summarize(&readings, &bounds(), &MetricPolicy::default()).unwrap();
        assert_eq!(summary.get("power"), Some(150.0));
        assert_eq!(summary.get("solar"), Some(10.0));
    }

    #[test]
    fn include_filter_applies() {
        let policy = MetricPolicy {
            include: Some(["power".to_string()].into_iter().collect()),
            ..MetricPolicy::default()
        };
        let readings = vec![reading(0, &[("power", 1.0), ("voltage", 120.0)])];
        let summary = summarize(&readings, &bounds(), &policy).unwrap();
        assert_eq!(summary.values.len(), 1);
        assert!(summary.get("voltage").is_none());
    }

    #[test]
    fn append_summary_replaces_same_period_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let target = tier(dir.path(), "monthly", Retention::Periods { max: 3 }, Resolution::Day);
        let ds = Downsampler::new(MetricPolicy::default());
        let now = Local.with_ymd_and_hms(2025, 6, 20, 0, 5, 0).unwrap();

        for d in 10..15 {
            let ts = Local.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap();
            let summary = Reading::new(ts, [("power".to_string(), d as f64)].into_iter().collect());
            ds.append_summary(&target, summary, 3, now).unwrap();
        }
        assert_eq!(target.load().len(), 3);

        let ts = Local.with_ymd_and_hms(2025, 6, 14, 0, 0, 0).unwrap();
        let again = Reading::new(ts, [("power".to_string(), 99.0)].into_iter().collect());
        let report = ds.append_summary(&target, again, 3, now).unwrap();

        assert_eq!(report.replaced, 1);
        assert_eq!(report.total, 3);
        let file = target.load();
        assert_eq!(file.newest().unwrap().get("power"), Some(99.0));
        assert_eq!(file.oldest().unwrap().get("power"), Some(12.0));
    }

    #[test]
    fn hourly_summaries_from_raw_tier() {
        let dir = tempfile::tempdir().unwrap();
        let raw = tier(dir.path(), "daily", Retention::SinceMidnight, Resolution::Raw);
        let ds = Downsampler::new(MetricPolicy::default());
        let day = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let midnight = powertier_util::local_day_start(day);

        for i in 0..144 {
            let ts = midnight + Duration::minutes(10 * i);
            let r = Reading::new(ts, [("power".to_string(), (i % 6) as f64)].into_iter().collect());
            raw.append(r, ts).unwrap();
        }
        // Crossing midnight moves the day into the previous snapshot
        raw.rotate_if_boundary_crossed(midnight + Duration::days(1)).unwrap();

        let summaries = ds.summarize_completed(&raw, Period::Hour, midnight + Duration::days(1));

        assert_eq!(summaries.len(), 24);
        assert_eq!(summaries[0].timestamp, midnight);
        assert!(summaries.iter().all(|s| s.get("power") == Some(2.5)));
    }

    #[test]
    fn duplicate_samples_count_toward_the_mean() {
        let dir = tempfile::tempdir().unwrap();
        let raw = tier(dir.path(), "daily", Retention::SinceMidnight, Resolution::Raw);
        let ds = Downsampler::new(MetricPolicy::default());
        let ts = Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();
        let later = ts + Duration::minutes(10);

        raw.append(Reading::new(ts, [("power".to_string(), 4.0)].into_iter().collect()), ts)
            .unwrap();
        raw.append(Reading::new(ts, [("power".to_string(), 4.0)].into_iter().collect()), ts)
            .unwrap();
        raw.append(Reading::new(later, [("power".to_string(), 1.0)].into_iter().collect()), later)
            .unwrap();

        let next_day = Local.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap();
        let summaries = ds.summarize_completed(&raw, Period::Day, next_day);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].get("power"), Some(3.0));
    }

    #[test]
    fn nothing_completed_yields_no_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let raw = tier(dir.path(), "daily", Retention::SinceMidnight, Resolution::Raw);
        let ds = Downsampler::new(MetricPolicy::default());
        let ts = Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();
        raw.append(Reading::new(ts, [("power".to_string(), 4.0)].into_iter().collect()), ts)
            .unwrap();

        assert!(ds.summarize_completed(&raw, Period::Day, ts).is_empty());
        assert!(ds.summarize_completed(&raw, Period::Hour, ts).is_empty());
    }
}
