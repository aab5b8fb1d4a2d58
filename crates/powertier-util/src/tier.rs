//! Tier vocabulary shared by config, store and core

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{TierName, local_day_start, local_hour_start};

/// Longest accepted sliding window (100 years)
pub const MAX_WINDOW_SECONDS: u64 = 100 * 365 * 24 * 3600;

/// How long a tier keeps its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Retention {
    /// Everything since the most recent local midnight; hard reset at each day boundary
    SinceMidnight,
    /// Sliding wall-clock window, evicted continuously on write
    Window { seconds: u64 },
    /// At most `max` summaries, one per period, oldest dropped first
    Periods { max: usize },
}

impl Retention {
    /// Oldest timestamp an age-based tier may still hold at `now`.
    ///
    /// Period-count tiers have no age cutoff, and neither does a window too
    /// large to subtract from `now`.
    pub fn cutoff(&self, now: &DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Retention::SinceMidnight => Some(local_day_start(now.date_naive())),
            Retention::Window { seconds } => i64::try_from(*seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|window| now.checked_sub_signed(window)),
            Retention::Periods { .. } => None,
        }
    }
}

/// Granularity of the entries a tier stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Readings as collected
    Raw,
    /// One summary per hour
    Hour,
    /// One summary per day
    Day,
}

impl Resolution {
    /// The summary period for this resolution, if it is a summary resolution
    pub fn period(&self) -> Option<Period> {
        match self {
            Resolution::Raw => None,
            Resolution::Hour => Some(Period::Hour),
            Resolution::Day => Some(Period::Day),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Raw => write!(f, "raw"),
            Resolution::Hour => write!(f, "hour"),
            Resolution::Day => write!(f, "day"),
        }
    }
}

/// A fixed-size time bucket summarized into one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Hour,
    Day,
}

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodBounds {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl PeriodBounds {
    pub fn contains(&self, ts: &DateTime<Local>) -> bool {
        *ts >= self.start && *ts < self.end
    }
}

impl Period {
    /// The period containing `ts`
    pub fn bounds_of(&self, ts: &DateTime<Local>) -> PeriodBounds {
        match self {
            Period::Hour => {
                let start = local_hour_start(ts);
                PeriodBounds {
                    start,
                    end: start + Duration::hours(1),
                }
            }
            Period::Day => {
                let date = ts.date_naive();
                let start = local_day_start(date);
                let end = date
                    .succ_opt()
                    .map(local_day_start)
                    .unwrap_or(start + Duration::days(1));
                PeriodBounds { start, end }
            }
        }
    }

    /// Distinct periods holding any of `timestamps` that ended at or before `before`,
    /// oldest first.
    ///
    /// Bounds derive from the data itself, so a job that runs days late still
    /// finds every closed period it has not yet seen.
    pub fn completed_periods<'a>(
        &self,
        timestamps: impl IntoIterator<Item = &'a DateTime<Local>>,
        before: DateTime<Local>,
    ) -> Vec<PeriodBounds> {
        let mut periods = BTreeMap::new();
        for ts in timestamps {
            let bounds = self.bounds_of(ts);
            if bounds.end <= before {
                periods.entry(bounds.start).or_insert(bounds);
            }
        }
        periods.into_values().collect()
    }
}

/// Whether a tier is mirrored to the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageClass {
    Local,
    Replicated { remote_path: String },
}

/// Fully-resolved definition of one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSpec {
    pub name: TierName,
    /// File name inside the data directory
    pub file: String,
    pub retention: Retention,
    pub resolution: Resolution,
    pub storage: StorageClass,
}

impl TierSpec {
    pub fn remote_path(&self) -> Option<&str> {
        match &self.storage {
            StorageClass::Local => None,
            StorageClass::Replicated { remote_path } => Some(remote_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_cutoff() {
        let now = Local.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let retention = Retention::Window { seconds: 3600 };
        assert_eq!(
            retention.cutoff(&now),
            Some(Local.with_ymd_and_hms(2025, 6, 15, 11, 0, 0).unwrap())
        );
        assert_eq!(Retention::Periods { max: 30 }.cutoff(&now), None);
    }

    #[test]
    fn since_midnight_cutoff() {
        let now = Local.with_ymd_and_hms(2025, 6, 15, 23, 50, 0).unwrap();
        assert_eq!(
            Retention::SinceMidnight.cutoff(&now),
            Some(Local.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn huge_window_has_no_cutoff() {
        let now = Local.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let retention = Retention::Window { seconds: u64::MAX };
        assert_eq!(retention.cutoff(&now), None);
        let retention = Retention::Window { seconds: i64::MAX as u64 };
        assert_eq!(retention.cutoff(&now), None);
        let retention = Retention::Window { seconds: MAX_WINDOW_SECONDS };
        assert!(retention.cutoff(&now).is_some());
    }

    #[test]
    fn day_bounds() {
        let ts = Local.with_ymd_and_hms(2025, 6, 15, 13, 40, 0).unwrap();
        let bounds = Period::Day.bounds_of(&ts);
        assert_eq!(bounds.start, Local.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap());
        assert_eq!(bounds.end, Local.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap());
        assert!(bounds.contains(&bounds.start));
        assert!(!bounds.contains(&bounds.end));
    }

    #[test]
    fn completed_periods_follow_the_data() {
        let stamps = [
            Local.with_ymd_and_hms(2025, 6, 14, 10, 0, 0).unwrap(),
            Local.with_ymd_and_hms(2025, 6, 14, 10, 30, 0).unwrap(),
            Local.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap(),
            Local.with_ymd_and_hms(2025, 6, 17, 0, 10, 0).unwrap(),
        ];
        let before = Local.with_ymd_and_hms(2025, 6, 17, 0, 0, 0).unwrap();

        // Two closed days, two days apart; today's reading is not complete
        let days = Period::Day.completed_periods(&stamps, before);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].start, Local.with_ymd_and_hms(2025, 6, 14, 0, 0, 0).unwrap());
        assert_eq!(days[1].start, Local.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap());

        let hours = Period::Hour.completed_periods(&stamps, before);
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].start, Local.with_ymd_and_hms(2025, 6, 14, 10, 0, 0).unwrap());
        assert_eq!(hours[0].end, Local.with_ymd_and_hms(2025, 6, 14, 11, 0, 0).unwrap());
    }

    #[test]
    fn retention_parses_from_tagged_form() {
        let r: Retention = serde_json::from_str(r#"{"type":"periods","max":30}"#).unwrap();
        assert_eq!(r, Retention::Periods { max: 30 });
        let r: Retention = serde_json::from_str(r#"{"type":"since_midnight"}"#).unwrap();
        assert_eq!(r, Retention::SinceMidnight);
    }
}
