//! Time utilities for powertier
//!
//! All retention and scheduling decisions are made against local wall-clock
//! time: the raw tier rotates at local midnight and jobs fire at a local
//! time-of-day.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `POWERTIER_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. This is useful
//! for exercising the nightly jobs without waiting for midnight.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 00:04:30`)
//!
//! Example:
//! ```bash
//! POWERTIER_MOCK_TIME="2025-12-25 00:04:30" powertierd daemon
//! ```

use chrono::{
    DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "POWERTIER_MOCK_TIME";

/// Cached mock time offset from the real time when the process started.
/// This allows mock time to advance naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(naive_dt) => {
                        if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                            let offset = mock_dt.signed_duration_since(Local::now());
                            tracing::info!(
                                mock_time = %mock_time_str,
                                offset_secs = offset.num_seconds(),
                                "Mock time enabled"
                            );
                            return Some(offset);
                        }
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            "Failed to convert mock time to local timezone"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// First instant of the given local calendar day.
///
/// Zones that skip midnight for daylight saving start the day at the first
/// valid local instant instead.
pub fn local_day_start(date: NaiveDate) -> DateTime<Local> {
    let midnight = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => Local
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| Local.from_utc_datetime(&midnight)),
    }
}

/// Start of the hour containing `dt`.
pub fn local_hour_start(dt: &DateTime<Local>) -> DateTime<Local> {
    *dt - Duration::minutes(dt.minute() as i64)
        - Duration::seconds(dt.second() as i64)
        - Duration::nanoseconds(dt.nanosecond() as i64)
}

/// Format a DateTime with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Local time-of-day at which a job becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Parse `HH:MM`
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        if h.len() != 2 || m.len() != 2 {
            return None;
        }
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Returns seconds since midnight
    pub fn as_seconds_from_midnight(&self) -> u32 {
        (self.hour as u32) * 3600 + (self.minute as u32) * 60
    }

    /// Whether `dt`'s local time-of-day is at or past this wall clock time
    pub fn has_passed(&self, dt: &DateTime<Local>) -> bool {
        Self::from_naive_time(dt.time()) >= *self
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_seconds_from_midnight()
            .cmp(&other.as_seconds_from_midnight())
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_wall_clock_ordering() {
        let early = WallClock::new(0, 2).unwrap();
        let later = WallClock::new(0, 15).unwrap();
        let noon = WallClock::new(12, 0).unwrap();

        assert!(early < later);
        assert!(later < noon);
    }

    #[test]
    fn test_wall_clock_parse() {
        assert_eq!(WallClock::parse("00:05"), WallClock::new(0, 5));
        assert_eq!(WallClock::parse("23:59"), WallClock::new(23, 59));
        assert!(WallClock::parse("24:00").is_none());
        assert!(WallClock::parse("0:05").is_none());
        assert!(WallClock::parse("00-05").is_none());
        assert!(WallClock::parse("").is_none());
    }

    #[test]
    fn test_wall_clock_display() {
        assert_eq!(WallClock::new(0, 2).unwrap().to_string(), "00:02");
    }

    #[test]
    fn test_has_passed() {
        let at = WallClock::new(0, 5).unwrap();
        let before = Local.with_ymd_and_hms(2025, 3, 10, 0, 4, 59).unwrap();
        let exact = Local.with_ymd_and_hms(2025, 3, 10, 0, 5, 0).unwrap();
        let after = Local.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap();

        assert!(!at.has_passed(&before));
        assert!(at.has_passed(&exact));
        assert!(at.has_passed(&after));
    }

    #[test]
    fn test_local_day_start() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let start = local_day_start(date);
        assert_eq!(start.date_naive(), date);
        assert_eq!(start.hour(), 0);
        assert_eq!(start.minute(), 0);
    }

    #[test]
    fn test_local_hour_start() {
        let dt = Local.with_ymd_and_hms(2025, 6, 15, 14, 37, 12).unwrap();
        let start = local_hour_start(&dt);
        assert_eq!(start, Local.with_ymd_and_hms(2025, 6, 15, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_format_datetime_full() {
        let dt = Local.with_ymd_and_hms(2025, 12, 25, 14, 30, 45).unwrap();
        assert_eq!(format_datetime_full(&dt), "2025-12-25 14:30:45");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_parse_mock_time_format() {
        let valid = ["2025-12-25 00:02:00", "2025-01-01 00:00:00"];
        for s in &valid {
            assert!(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok());
        }

        let invalid = ["2025-12-25", "2025-12-25T00:02:00", ""];
        for s in &invalid {
            assert!(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_err());
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_is_mock_time_active_does_not_panic() {
        let _ = is_mock_time_active();
    }
}
