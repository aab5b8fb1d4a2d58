//! Home Assistant sensor polling

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use powertier_config::CollectorConfig;
use powertier_store::Reading;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Subset of `GET /api/states/{entity_id}`
#[derive(Debug, Deserialize)]
struct EntityState {
    state: String,
}

/// Builds readings from the current state of configured Home Assistant sensors
pub struct HomeAssistantSource {
    client: Client,
    config: CollectorConfig,
}

impl HomeAssistantSource {
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Poll every sensor once.
    ///
    /// Sensors that fail or report a non-numeric state are left out. Returns
    /// `None` if no sensor produced a value.
    pub async fn poll(&self, now: DateTime<Local>) -> Option<Reading> {
        let mut values = BTreeMap::new();

        for (metric, entity) in &self.config.sensors {
            match self.fetch_state(entity).await {
                Ok(state) => match parse_state(&state) {
                    Some(value) => {
                        values.insert(metric.clone(), value);
                    }
                    None => debug!(metric = %metric, entity = %entity, state = %state, "Non-numeric state skipped"),
                },
                Err(e) => warn!(metric = %metric, entity = %entity, error = %e, "Sensor poll failed"),
            }
        }

        if values.is_empty() {
            warn!("No sensor returned a value");
            return None;
        }
        Some(Reading::new(now, values))
    }

    async fn fetch_state(&self, entity: &str) -> Result<String> {
        let url = state_url(&self.config.url, entity);
        let state: EntityState = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .json()
            .await?;
        Ok(state.state)
    }
}

fn state_url(base: &str, entity: &str) -> String {
    format!("{}/api/states/{}", base.trim_end_matches('/'), entity)
}

/// Numeric value of an entity state; `unavailable`, `unknown` and the like yield `None`
fn parse_state(state: &str) -> Option<f64> {
    state.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
