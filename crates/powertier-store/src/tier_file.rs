//! In-memory form of one tier's JSON file

use chrono::{DateTime, Local, NaiveDate};
use powertier_util::{Resolution, Retention, TierName, TierSpec};
use serde::{Deserialize, Serialize};

use crate::Reading;
use crate::reading::deserialize_opt_timestamp;

/// Contents of a tier file.
///
/// `data_points` is kept in chronological order; readings with equal
/// timestamps keep their arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierFile {
    #[serde(default)]
    pub data_points: Vec<Reading>,

    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub last_update: Option<DateTime<Local>>,

    /// Describes the tier that wrote this file. Older files may lack it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierMeta>,
}

/// Tier metadata embedded in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMeta {
    pub name: TierName,
    pub resolution: Resolution,
    pub retention: Retention,
}

impl From<&TierSpec> for TierMeta {
    fn from(spec: &TierSpec) -> Self {
        Self {
            name: spec.name.clone(),
            resolution: spec.resolution,
            retention: spec.retention,
        }
    }
}

impl TierFile {
    pub fn new(spec: &TierSpec) -> Self {
        Self {
            data_points: Vec::new(),
            last_update: None,
            tier: Some(TierMeta::from(spec)),
        }
    }

    pub fn len(&self) -> usize {
        self.data_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }

    pub fn oldest(&self) -> Option<&Reading> {
        self.data_points.first()
    }

    pub fn newest(&self) -> Option<&Reading> {
        self.data_points.last()
    }

    /// Local day this file's content belongs to
    pub fn day(&self) -> Option<NaiveDate> {
        self.last_update
            .or_else(|| self.newest().map(|r| r.timestamp))
            .map(|ts| ts.date_naive())
    }

    /// Insert after every reading at or before its timestamp
    pub fn insert(&mut self, reading: Reading) {
        let idx = self
            .data_points
            .partition_point(|r| r.timestamp <= reading.timestamp);
        self.data_points.insert(idx, reading);
    }

    /// Insert, replacing any reading with the same timestamp
    pub fn upsert(&mut self, reading: Reading) -> bool {
        let before = self.data_points.len();
        self.data_points.retain(|r| r.timestamp != reading.timestamp);
        let replaced = self.data_points.len() != before;
        self.insert(reading);
        replaced
    }

    /// Drop everything outside `retention` as of `now`. Returns the number evicted.
    ///
    /// Age-based tiers hold `[now - window, now]`; readings dated after `now` go too.
    pub fn evict(&mut self, retention: &Retention, now: &DateTime<Local>) -> usize {
        let before = self.data_points.len();
        match retention {
            Retention::Periods { max } => self.trim_to(*max),
            _ => {
                let cutoff = retention.cutoff(now);
                self.data_points
                    .retain(|r| r.timestamp <= *now && cutoff.is_none_or(|c| r.timestamp >= c));
            }
        }
        before - self.data_points.len()
    }

    /// Keep the newest `max` readings
    pub fn trim_to(&mut self, max: usize) {
        if self.data_points.len() > max {
            let excess = self.data_points.len() - max;
            self.data_points.drain(..excess);
        }
    }

    /// Whether every reading satisfies `retention` as of `now`
    pub fn within_retention(&self, retention: &Retention, now: &DateTime<Local>) -> bool {
        match retention {
            Retention::Periods { max } => self.data_points.len() <= *max,
            _ => {
                let cutoff = retention.cutoff(now);
                self.data_points
                    .iter()
                    .all(|r| r.timestamp <= *now && cutoff.is_none_or(|c| r.timestamp >= c))
            }
        }
    }
}
