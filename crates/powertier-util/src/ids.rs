//! Strongly-typed names for tiers and jobs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a retention tier (e.g. `daily`, `weekly`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierName(String);

impl TierName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TierName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TierName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a scheduled job (e.g. `monthly`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reading fields that share the JSON object with metric values
pub const RESERVED_READING_FIELDS: &[&str] = &["timestamp"];

/// Check that `name` can be stored as a metric next to the reading timestamp
pub fn check_metric_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("metric name must not be empty".into());
    }
    if RESERVED_READING_FIELDS.contains(&name) {
        return Err(format!("'{}' is reserved and cannot be a metric name", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_metric_names() {
        assert!(check_metric_name("power").is_ok());
        assert!(check_metric_name("timestamp").is_err());
        assert!(check_metric_name("").is_err());
        assert!(check_metric_name("  ").is_err());
    }

    #[test]
    fn tier_name_display() {
        let name = TierName::new("monthly");
        assert_eq!(name.to_string(), "monthly");
        assert_eq!(name.as_str(), "monthly");
    }

    #[test]
    fn names_serialize_as_plain_strings() {
        let json = serde_json::to_string(&JobName::from("yearly")).unwrap();
        assert_eq!(json, "\"yearly\"");

        let parsed: TierName = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(parsed, TierName::new("weekly"));
    }
}
