//! Reading ingestion into the raw tier

use chrono::{DateTime, Local};
use powertier_store::{AuditEvent, AuditEventType, Reading, Rotation, StateStore, TieredStore};
use powertier_util::check_metric_name;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{JobError, JobResult};

/// Result of ingesting one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Written; the raw tier now holds `points` readings
    Stored { points: usize },
    /// Dropped because maintenance mode is on
    Skipped,
}

/// Validates readings and appends them to the raw tier
pub struct Ingestor {
    raw: TieredStore,
    store: Arc<dyn StateStore>,
}

impl Ingestor {
    pub fn new(raw: TieredStore, store: Arc<dyn StateStore>) -> Self {
        Self { raw, store }
    }

    pub fn tier(&self) -> &TieredStore {
        &self.raw
    }

    pub fn ingest(&self, reading: Reading, now: DateTime<Local>) -> JobResult<IngestOutcome> {
        validate(&reading)?;

        if self.store.is_maintenance()? {
            info!(tier = %self.raw.name(), "Maintenance mode on, reading skipped");
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ReadingSkipped {
                reason: "maintenance".into(),
            }));
            return Ok(IngestOutcome::Skipped);
        }

        if let Rotation::Rotated {
            closed_day,
            archived_points,
        } = self.raw.rotate_if_boundary_crossed(now)?
        {
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::TierRotated {
                tier: self.raw.name().clone(),
                closed_day,
                archived_points,
            }));
        }

        let metrics = reading.values.len();
        let file = self.raw.append(reading, now)?;
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ReadingIngested {
            tier: self.raw.name().clone(),
            metrics,
        }));

        debug!(tier = %self.raw.name(), points = file.len(), metrics, "Reading ingested");
        Ok(IngestOutcome::Stored { points: file.len() })
    }
}

/// A reading must carry at least one metric, only finite values, and no
/// metric that collides with a reserved field
pub fn validate(reading: &Reading) -> JobResult<()> {
    if reading.is_empty() {
        return Err(JobError::InvalidReading("no metrics".into()));
    }
    for metric in reading.values.keys() {
        check_metric_name(metric).map_err(JobError::InvalidReading)?;
    }
    if let Some((metric, value)) = reading.values.iter().find(|(_, v)| !v.is_finite()) {
        return Err(JobError::InvalidReading(format!(
            "{} is not a finite number ({})",
            metric, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use powertier_store::SqliteStore;
    use powertier_util::{Resolution, Retention, StorageClass, TierName, TierSpec};
    use std::collections::BTreeMap;

    fn setup(dir: &std::path::Path) -> (Ingestor, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let raw = TieredStore::new(
            dir,
            TierSpec {
                name: TierName::new("daily"),
                file: "daily.json".into(),
                retention: Retention::SinceMidnight,
                resolution: Resolution::Raw,
                storage: StorageClass::Local,
            },
        );
        (Ingestor::new(raw, store.clone()), store)
    }

    fn reading(ts: DateTime<Local>, values: &[(&str, f64)]) -> Reading {
        Reading::new(
            ts,
            values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn stores_valid_reading() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, store) = setup(dir.path());
        let now = Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();

        let outcome = ingestor.ingest(reading(now, &[("power", 410.0)]), now).unwrap();
        assert_eq!(outcome, IngestOutcome::Stored { points: 1 });

        let audits = store.get_recent_audits(1).unwrap();
        assert!(matches!(audits[0].event, AuditEventType::ReadingIngested { metrics: 1, .. }));
    }

    #[test]
    fn rejects_bad_readings() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _store) = setup(dir.path());
        let now = Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();

        assert!(matches!(
            ingestor.ingest(reading(now, &[]), now),
            Err(JobError::InvalidReading(_))
        ));
        assert!(matches!(
            ingestor.ingest(reading(now, &[("power", f64::NAN)]), now),
            Err(JobError::InvalidReading(_))
        ));
        assert!(ingestor.tier().try_load().unwrap().is_none());
    }

    #[test]
    fn reserved_metric_name_cannot_corrupt_the_tier() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _store) = setup(dir.path());
        let now = Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();

        for m in 0..5 {
            let ts = now + chrono::Duration::minutes(m);
            ingestor.ingest(reading(ts, &[("power", 1.0)]), ts).unwrap();
        }
        let later = now + chrono::Duration::minutes(10);
        assert!(matches!(
            ingestor.ingest(reading(later, &[("timestamp", 7.0)]), later),
            Err(JobError::InvalidReading(_))
        ));
        assert!(matches!(
            ingestor.ingest(reading(later, &[("", 7.0)]), later),
            Err(JobError::InvalidReading(_))
        ));

        assert_eq!(ingestor.tier().try_load().unwrap().unwrap().len(), 5);
        assert_eq!(
            ingestor.ingest(reading(later, &[("power", 2.0)]), later).unwrap(),
            IngestOutcome::Stored { points: 6 }
        );
    }

    #[test]
    fn maintenance_skips() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, store) = setup(dir.path());
        let now = Local.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();

        store.set_maintenance(true).unwrap();
        assert_eq!(
            ingestor.ingest(reading(now, &[("power", 1.0)]), now).unwrap(),
            IngestOutcome::Skipped
        );
        assert!(ingestor.tier().load().is_empty());

        store.set_maintenance(false).unwrap();
        assert_eq!(
            ingestor.ingest(reading(now, &[("power", 1.0)]), now).unwrap(),
            IngestOutcome::Stored { points: 1 }
        );
    }

    #[test]
    fn first_reading_after_midnight_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, store) = setup(dir.path());
        let evening = Local.with_ymd_and_hms(2025, 6, 15, 23, 50, 0).unwrap();
        let morning = Local.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap();

        ingestor.ingest(reading(evening, &[("power", 1.0)]), evening).unwrap();
        let outcome = ingestor.ingest(reading(morning, &[("power", 2.0)]), morning).unwrap();

        assert_eq!(outcome, IngestOutcome::Stored { points: 1 });
        assert_eq!(ingestor.tier().load_previous().len(), 1);
        let audits = store.get_recent_audits(2).unwrap();
        assert!(matches!(audits[1].event, AuditEventType::TierRotated { archived_points: 1, .. }));
    }
}
