//! File-backed retention tier

use chrono::{DateTime, Duration, Local, NaiveDate};
use powertier_util::{Retention, TierName, TierSpec, local_day_start};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{Reading, StoreError, StoreResult, TierFile};

/// Closed days a since-midnight tier keeps in its archive
pub const ARCHIVE_DAYS: i64 = 7;

/// One tier persisted as a JSON file in the data directory.
///
/// Every write rewrites the whole file through a sibling temp file that is
/// flushed, synced and renamed over the target, so readers only ever see a
/// complete file.
#[derive(Debug, Clone)]
pub struct TieredStore {
    spec: TierSpec,
    path: PathBuf,
}

/// Outcome of a day-boundary check on a since-midnight tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// Still the same local day
    NotNeeded,
    /// The closed day was archived and the tier cleared
    Rotated {
        closed_day: NaiveDate,
        archived_points: usize,
    },
}

impl TieredStore {
    pub fn new(data_dir: impl AsRef<Path>, spec: TierSpec) -> Self {
        let path = data_dir.as_ref().join(&spec.file);
        Self { spec, path }
    }

    pub fn spec(&self) -> &TierSpec {
        &self.spec
    }

    pub fn name(&self) -> &TierName {
        &self.spec.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive of recently closed days, kept for downsampling after rotation
    pub fn previous_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.spec.name.to_string());
        self.path.with_file_name(format!("{}.previous.json", stem))
    }

    /// Read the tier file.
    ///
    /// `Ok(None)` when the file does not exist; `Err(Corrupt)` when it cannot be parsed.
    pub fn try_load(&self) -> StoreResult<Option<TierFile>> {
        read_tier_file(&self.path)
    }

    /// Current contents; missing or unparsable files yield an empty tier.
    pub fn load(&self) -> TierFile {
        self.load_path(&self.path)
    }

    /// Contents of the closed-day archive, empty if there is none
    pub fn load_previous(&self) -> TierFile {
        self.load_path(&self.previous_path())
    }

    fn load_path(&self, path: &Path) -> TierFile {
        match read_tier_file(path) {
            Ok(Some(mut file)) => {
                file.tier = Some((&self.spec).into());
                file
            }
            Ok(None) => TierFile::new(&self.spec),
            Err(e) => {
                warn!(
                    tier = %self.spec.name,
                    path = %path.display(),
                    error = %e,
                    "Tier file unreadable, starting from an empty tier"
                );
                TierFile::new(&self.spec)
            }
        }
    }

    /// Insert a reading, evict everything outside retention, persist.
    ///
    /// A since-midnight tier first rotates if `now` is on a later day than its content.
    pub fn append(&self, reading: Reading, now: DateTime<Local>) -> StoreResult<TierFile> {
        let mut file = self.load();
        if self.spec.retention == Retention::SinceMidnight {
            self.rotate_loaded(&mut file, now)?;
        }

        file.insert(reading);
        let evicted = file.evict(&self.spec.retention, &now);
        file.last_update = Some(now);
        self.save(&file)?;

        debug!(
            tier = %self.spec.name,
            points = file.len(),
            evicted,
            "Reading appended"
        );
        Ok(file)
    }

    /// Clear a since-midnight tier once per local day boundary.
    ///
    /// The closed day is merged into the archive first, so days a late job
    /// has not summarized yet survive the next rotation. Other
    /// retention kinds never rotate.
    pub fn rotate_if_boundary_crossed(&self, now: DateTime<Local>) -> StoreResult<Rotation> {
        if self.spec.retention != Retention::SinceMidnight {
            return Ok(Rotation::NotNeeded);
        }

        let mut file = self.load();
        let rotation = self.rotate_loaded(&mut file, now)?;
        if rotation != Rotation::NotNeeded {
            file.last_update = Some(now);
            self.save(&file)?;
        }
        Ok(rotation)
    }

    fn rotate_loaded(&self, file: &mut TierFile, now: DateTime<Local>) -> StoreResult<Rotation> {
        let today = now.date_naive();
        let day = match file.day() {
            Some(day) if day < today => day,
            _ => return Ok(Rotation::NotNeeded),
        };

        let closed = std::mem::replace(file, TierFile::new(&self.spec));
        let archived_points = closed.len();

        // A closed day replaces any earlier copy of itself; days past the
        // archive horizon are dropped.
        let horizon = local_day_start((now - Duration::days(ARCHIVE_DAYS)).date_naive());
        let mut archive = self.load_previous();
        archive
            .data_points
            .retain(|r| r.timestamp >= horizon && r.timestamp.date_naive() != day);
        for reading in closed.data_points {
            archive.insert(reading);
        }
        archive.last_update = closed.last_update;
        write_atomic(&self.previous_path(), &archive)?;

        info!(
            tier = %self.spec.name,
            closed_day = %day,
            archived_points,
            "Day boundary crossed, tier rotated"
        );
        Ok(Rotation::Rotated {
            closed_day: day,
            archived_points,
        })
    }

    /// Readings stamped before `before` from the closed-day archive and the
    /// live file, oldest first. Readings sharing a timestamp are all kept.
    pub fn readings_before(&self, before: DateTime<Local>) -> Vec<Reading> {
        let mut out: Vec<Reading> = self
            .load_previous()
            .data_points
            .into_iter()
            .chain(self.load().data_points)
            .filter(|r| r.timestamp < before)
            .collect();
        out.sort_by_key(|r| r.timestamp);
        out
    }

    /// Atomically replace the file contents
    pub fn save(&self, file: &TierFile) -> StoreResult<()> {
        write_atomic(&self.path, file)
    }

    /// Write the temp file without renaming it into place
    pub fn stage(&self, file: &TierFile) -> StoreResult<StagedWrite> {
        StagedWrite::prepare(&self.path, file)
    }

    /// Replace the file with externally supplied JSON (e.g. a remote copy).
    ///
    /// The content must parse as a tier file; otherwise nothing is written.
    pub fn replace_from_bytes(&self, content: &[u8]) -> StoreResult<TierFile> {
        let mut file: TierFile =
            serde_json::from_slice(content).map_err(|e| StoreError::Corrupt {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        file.tier = Some((&self.spec).into());
        self.save(&file)?;
        Ok(file)
    }

    /// Serialized form of the current contents
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.load())?)
    }
}

fn read_tier_file(path: &Path) -> StoreResult<Option<TierFile>> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

fn write_atomic(path: &Path, file: &TierFile) -> StoreResult<()> {
    StagedWrite::prepare(path, file)?.commit()
}

/// A fully written and synced temp file waiting to be renamed over its target
#[derive(Debug)]
pub struct StagedWrite {
    tmp_path: PathBuf,
    target: PathBuf,
}

impl StagedWrite {
    fn prepare(target: &Path, file: &TierFile) -> StoreResult<Self> {
        let mut name = target.as_os_str().to_owned();
        name.push(".tmp");
        let tmp_path = PathBuf::from(name);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(file)?;
        let result = File::create(&tmp_path).and_then(|mut f| {
            f.write_all(&json)?;
            f.flush()?;
            f.sync_all()
        });
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        Ok(Self {
            tmp_path,
            target: target.to_path_buf(),
        })
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Rename the temp file over the target
    pub fn commit(self) -> StoreResult<()> {
        fs::rename(&self.tmp_path, &self.target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use powertier_util::{Resolution, StorageClass};
    use std::collections::BTreeMap;

    fn raw_spec() -> TierSpec {
        TierSpec {
            name: TierName::new("daily"),
            file: "daily.json".into(),
            retention: Retention::SinceMidnight,
            resolution: Resolution::Raw,
            storage: StorageClass::Local,
        }
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, d, h, m, 0).unwrap()
    }

    fn power(ts: DateTime<Local>, value: f64) -> Reading {
        Reading::new(ts, BTreeMap::from([("power".to_string(), value)]))
    }

    #[test]
    fn full_day_of_ten_minute_readings() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        let midnight = local_day_start(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap());

        for i in 0..144 {
            let ts = midnight + Duration::minutes(10 * i);
            store.append(power(ts, i as f64), ts).unwrap();
        }

        let file = store.load();
        assert_eq!(file.len(), 144);
        assert_eq!(file.oldest().unwrap().timestamp, midnight);
        assert_eq!(
            file.newest().unwrap().timestamp,
            midnight + Duration::minutes(23 * 60 + 50)
        );
    }

    #[test]
    fn window_tier_holds_retention_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TierSpec {
            name: TierName::new("recent"),
            file: "recent.json".into(),
            retention: Retention::Window { seconds: 3600 },
            resolution: Resolution::Raw,
            storage: StorageClass::Local,
        };
        let store = TieredStore::new(dir.path(), spec.clone());

        for m in (0..180).step_by(10) {
            let ts = at(15, 8, 0) + Duration::minutes(m);
            let file = store.append(power(ts, m as f64), ts).unwrap();
            assert!(file.within_retention(&spec.retention, &ts));
        }
        assert_eq!(store.load().len(), 7);
    }

    #[test]
    fn period_tier_holds_max_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TierSpec {
            name: TierName::new("monthly"),
            file: "monthly.json".into(),
            retention: Retention::Periods { max: 30 },
            resolution: Resolution::Day,
            storage: StorageClass::Local,
        };
        let store = TieredStore::new(dir.path(), spec);
        let start = at(1, 0, 0);

        for d in 0..40 {
            let ts = start + Duration::days(d);
            store.append(power(ts, d as f64), ts).unwrap();
        }

        let file = store.load();
        assert_eq!(file.len(), 30);
        assert_eq!(file.oldest().unwrap().get("power"), Some(10.0));
    }

    #[test]
    fn rotation_happens_once_per_day_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());

        store.append(power(at(15, 22, 0), 1.0), at(15, 22, 0)).unwrap();
        store.append(power(at(15, 23, 50), 2.0), at(15, 23, 50)).unwrap();

        assert_eq!(
            store.rotate_if_boundary_crossed(at(15, 23, 59)).unwrap(),
            Rotation::NotNeeded
        );
        assert_eq!(
            store.rotate_if_boundary_crossed(at(16, 0, 0)).unwrap(),
            Rotation::Rotated {
                closed_day: NaiveDate::from_ymd_opt(2025, 6, 15).unwrap(),
                archived_points: 2,
            }
        );
        assert_eq!(
            store.rotate_if_boundary_crossed(at(16, 0, 1)).unwrap(),
            Rotation::NotNeeded
        );

        assert!(store.load().is_empty());
        assert_eq!(store.load_previous().len(), 2);
    }

    #[test]
    fn append_after_midnight_archives_closed_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());

        store.append(power(at(15, 23, 50), 2.0), at(15, 23, 50)).unwrap();
        store.append(power(at(16, 0, 0), 3.0), at(16, 0, 0)).unwrap();

        let live = store.load();
        assert_eq!(live.len(), 1);
        assert_eq!(live.oldest().unwrap().get("power"), Some(3.0));

        let readings = store.readings_before(at(16, 0, 0));
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].get("power"), Some(2.0));
    }

    #[test]
    fn archive_keeps_days_until_the_horizon() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());

        store.append(power(at(10, 12, 0), 1.0), at(10, 12, 0)).unwrap();
        store.append(power(at(11, 12, 0), 2.0), at(11, 12, 0)).unwrap();
        store.append(power(at(12, 12, 0), 3.0), at(12, 12, 0)).unwrap();
        assert_eq!(store.load_previous().len(), 2);

        // Rotating the same day again does not duplicate it
        store.append(power(at(12, 13, 0), 4.0), at(12, 13, 0)).unwrap();
        store.rotate_if_boundary_crossed(at(13, 0, 0)).unwrap();
        assert_eq!(store.load_previous().len(), 4);

        // Ten days later only the most recent closed days remain
        store.append(power(at(19, 12, 0), 5.0), at(19, 12, 0)).unwrap();
        store.rotate_if_boundary_crossed(at(20, 0, 0)).unwrap();
        let archive = store.load_previous();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.oldest().unwrap().get("power"), Some(5.0));
    }

    #[test]
    fn duplicate_samples_are_all_returned() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        store.append(power(at(15, 10, 0), 4.0), at(15, 10, 0)).unwrap();
        store.append(power(at(15, 10, 0), 4.0), at(15, 10, 0)).unwrap();
        store.append(power(at(15, 10, 10), 1.0), at(15, 10, 10)).unwrap();

        let readings = store.readings_before(at(16, 0, 0));
        assert_eq!(readings.len(), 3);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        fs::write(store.path(), b"{ not json").unwrap();

        assert!(matches!(store.try_load(), Err(StoreError::Corrupt { .. })));
        assert!(store.load().is_empty());

        // The next write replaces the corrupt file with a valid one
        store.append(power(at(15, 1, 0), 1.0), at(15, 1, 0)).unwrap();
        assert_eq!(store.try_load().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        assert!(store.try_load().unwrap().is_none());
        assert!(store.load().is_empty());
    }

    #[test]
    fn interrupted_write_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        store.append(power(at(15, 1, 0), 1.0), at(15, 1, 0)).unwrap();
        let before = fs::read(store.path()).unwrap();

        let mut next = store.load();
        next.insert(power(at(15, 2, 0), 2.0));
        let staged = store.stage(&next).unwrap();
        assert!(staged.tmp_path().exists());

        // Crash before rename: target untouched and still parseable
        drop(staged);
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(store.try_load().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn failed_write_returns_error_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        store.append(power(at(15, 1, 0), 1.0), at(15, 1, 0)).unwrap();
        let before = fs::read(store.path()).unwrap();

        // A directory squatting on the temp path makes the write fail
        fs::create_dir(dir.path().join("daily.json.tmp")).unwrap();
        let result = store.append(power(at(15, 2, 0), 2.0), at(15, 2, 0));

        assert!(result.is_err());
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn replace_from_bytes_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(dir.path(), raw_spec());
        store.append(power(at(15, 1, 0), 1.0), at(15, 1, 0)).unwrap();

        assert!(store.replace_from_bytes(b"<html>").is_err());
        assert_eq!(store.load().len(), 1);

        let restored = store
            .replace_from_bytes(br#"{"data_points": [], "last_update": null}"#)
            .unwrap();
        assert!(restored.is_empty());
        assert!(store.load().is_empty());
    }

    #[test]
    fn previous_path_is_sibling() {
        let store = TieredStore::new("/data", raw_spec());
        assert_eq!(store.previous_path(), PathBuf::from("/data/daily.previous.json"));
    }
}
