//! SQLite-based state store implementation

use chrono::{DateTime, Local, NaiveDate};
use powertier_util::{JobName, TierName};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::{AuditEvent, AuditEventType, JobRun, StateStore, StoreResult, SyncRecord};

const MAINTENANCE_FLAG: &str = "maintenance";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Schedule state
            CREATE TABLE IF NOT EXISTS job_runs (
                job TEXT PRIMARY KEY,
                last_run TEXT NOT NULL,
                completed_at TEXT NOT NULL
            );

            -- Remote sync records
            CREATE TABLE IF NOT EXISTS sync_records (
                tier TEXT PRIMARY KEY,
                remote_path TEXT NOT NULL,
                last_known_sha TEXT NOT NULL,
                synced_at TEXT NOT NULL
            );

            -- Boolean flags
            CREATE TABLE IF NOT EXISTS flags (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| powertier_util::now())
}

fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl StateStore for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_datetime(&timestamp_str),
                event,
            });
        }

        Ok(events)
    }

    fn get_last_run(&self, job: &JobName) -> StoreResult<Option<NaiveDate>> {
        let conn = self.conn.lock().unwrap();

        let last_run = conn
            .query_row(
                "SELECT last_run FROM job_runs WHERE job = ?",
                [job.as_str()],
                |row| parse_date(&row.get::<_, String>(0)?),
            )
            .optional()?;

        Ok(last_run)
    }

    fn set_last_run(
        &self,
        job: &JobName,
        date: NaiveDate,
        at: DateTime<Local>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let date_str = date.format("%Y-%m-%d").to_string();

        conn.execute(
            r#"
            INSERT INTO job_runs (job, last_run, completed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(job)
            DO UPDATE SET last_run = excluded.last_run, completed_at = excluded.completed_at
            "#,
            params![job.as_str(), date_str, at.to_rfc3339()],
        )?;

        debug!(job = %job, last_run = %date_str, "Job run recorded");
        Ok(())
    }

    fn list_job_runs(&self) -> StoreResult<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt =
            conn.prepare("SELECT job, last_run, completed_at FROM job_runs ORDER BY job")?;
        let rows = stmt.query_map([], |row| {
            let job: String = row.get(0)?;
            let last_run: String = row.get(1)?;
            let completed_at: String = row.get(2)?;
            Ok(JobRun {
                job: JobName::new(job),
                last_run: parse_date(&last_run)?,
                completed_at: parse_datetime(&completed_at),
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_sync_record(&self, tier: &TierName) -> StoreResult<Option<SyncRecord>> {
        let conn = self.conn.lock().unwrap();

        let record = conn
            .query_row(
                "SELECT tier, remote_path, last_known_sha, synced_at FROM sync_records WHERE tier = ?",
                [tier.as_str()],
                row_to_sync_record,
            )
            .optional()?;

        Ok(record)
    }

    fn put_sync_record(&self, record: &SyncRecord) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO sync_records (tier, remote_path, last_known_sha, synced_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tier)
            DO UPDATE SET
                remote_path = excluded.remote_path,
                last_known_sha = excluded.last_known_sha,
                synced_at = excluded.synced_at
            "#,
            params![
                record.tier.as_str(),
                record.remote_path,
                record.last_known_sha,
                record.synced_at.to_rfc3339()
            ],
        )?;

        debug!(tier = %record.tier, sha = %record.last_known_sha, "Sync record saved");
        Ok(())
    }

    fn clear_sync_record(&self, tier: &TierName) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM sync_records WHERE tier = ?", [tier.as_str()])?;
        Ok(removed > 0)
    }

    fn list_sync_records(&self) -> StoreResult<Vec<SyncRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT tier, remote_path, last_known_sha, synced_at FROM sync_records ORDER BY tier",
        )?;
        let rows = stmt.query_map([], row_to_sync_record)?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn is_maintenance(&self) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();

        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM flags WHERE name = ?",
                [MAINTENANCE_FLAG],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.unwrap_or(0) != 0)
    }

    fn set_maintenance(&self, enabled: bool) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO flags (name, value)
            VALUES (?, ?)
            ON CONFLICT(name)
            DO UPDATE SET value = excluded.value
            "#,
            params![MAINTENANCE_FLAG, enabled as i64],
        )?;

        debug!(enabled, "Maintenance flag set");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

fn row_to_sync_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    let tier: String = row.get(0)?;
    let synced_at: String = row.get(3)?;
    Ok(SyncRecord {
        tier: TierName::new(tier),
        remote_path: row.get(1)?,
        last_known_sha: row.get(2)?,
        synced_at: parse_datetime(&synced_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::MaintenanceToggled {
                enabled: true,
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::MaintenanceToggled { enabled: true }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));

        assert_eq!(store.get_recent_audits(1).unwrap().len(), 1);
    }

    #[test]
    fn test_job_runs() {
        let store = SqliteStore::in_memory().unwrap();
        let job = JobName::new("monthly");
        let day1 = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();

        assert!(store.get_last_run(&job).unwrap().is_none());

        store.set_last_run(&job, day1, powertier_util::now()).unwrap();
        assert_eq!(store.get_last_run(&job).unwrap(), Some(day1));

        store.set_last_run(&job, day2, powertier_util::now()).unwrap();
        assert_eq!(store.get_last_run(&job).unwrap(), Some(day2));

        let runs = store.list_job_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].last_run, day2);
    }

    #[test]
    fn test_sync_records() {
        let store = SqliteStore::in_memory().unwrap();
        let tier = TierName::new("monthly");

        assert!(store.get_sync_record(&tier).unwrap().is_none());

        let mut record = SyncRecord {
            tier: tier.clone(),
            remote_path: "data/monthly.json".into(),
            last_known_sha: "abc".into(),
            synced_at: powertier_util::now(),
        };
        store.put_sync_record(&record).unwrap();
        record.last_known_sha = "def".into();
        store.put_sync_record(&record).unwrap();

        let loaded = store.get_sync_record(&tier).unwrap().unwrap();
        assert_eq!(loaded.last_known_sha, "def");
        assert_eq!(store.list_sync_records().unwrap().len(), 1);

        assert!(store.clear_sync_record(&tier).unwrap());
        assert!(!store.clear_sync_record(&tier).unwrap());
        assert!(store.get_sync_record(&tier).unwrap().is_none());
    }

    #[test]
    fn test_maintenance_flag() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.is_maintenance().unwrap());

        store.set_maintenance(true).unwrap();
        assert!(store.is_maintenance().unwrap());

        store.set_maintenance(false).unwrap();
        assert!(!store.is_maintenance().unwrap());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("powertier.db");
        let job = JobName::new("weekly");
        let day = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_last_run(&job, day, powertier_util::now()).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_last_run(&job).unwrap(), Some(day));
    }
}
