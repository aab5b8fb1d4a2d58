//! Timestamped metric readings

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One sample: a timestamp and a flat map of metric name to value.
///
/// Serialized flat, as `{"timestamp": "...", "power": 412.5, ...}`. Non-numeric
/// fields found on disk (such as a legacy `"unit"`) are dropped on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReading")]
pub struct Reading {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Local>, values: BTreeMap<String, f64>) -> Self {
        Self { timestamp, values }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Deserialize)]
struct RawReading {
    timestamp: String,
    #[serde(flatten)]
    fields: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawReading> for Reading {
    type Error = String;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&raw.timestamp)
            .ok_or_else(|| format!("invalid timestamp '{}'", raw.timestamp))?;
        let values = raw
            .fields
            .into_iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
            .collect();
        Ok(Self { timestamp, values })
    }
}

/// Parse an RFC 3339 timestamp, or an offset-less ISO 8601 one taken as local time.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local.from_local_datetime(&naive).earliest()
}

pub(crate) fn deserialize_opt_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Local>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
