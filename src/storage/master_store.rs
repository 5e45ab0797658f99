use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{DATE, PRICE, PRODUCT, SOLD_UNITS, empty_master_frame, records_from_frame};
use crate::storage::table_io::{copy_file_atomic, read_table, write_table_atomic};

const CANONICAL_COLUMNS: [&str; 4] = [DATE, PRODUCT, PRICE, SOLD_UNITS];

/// Sole owner of the persisted master dataset and its backups.
///
/// Runs against one master location must be serialized; [`MasterStore::lock`]
/// provides an exclusive lock file for callers that may be invoked
/// concurrently.
#[derive(Debug, Clone)]
pub struct MasterStore {
    master_path: PathBuf,
    backup_dir: PathBuf,
}

/// Held while a run owns the master; removes the lock file on drop.
#[derive(Debug)]
pub struct MasterLock {
    path: PathBuf,
}

impl Drop for MasterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

impl MasterStore {
    pub fn new(master_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            master_path: master_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn master_path(&self) -> &Path {
        &self.master_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn exists(&self) -> bool {
        self.master_path.is_file()
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .master_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.master_path.with_file_name(name)
    }

    /// Takes the single-writer lock; fails with `MasterLocked` if another
    /// run holds it. A lock left by a crashed run must be removed by hand.
    pub fn lock(&self) -> LedgerResult<MasterLock> {
        let path = self.lock_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LedgerError::storage_write(parent, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(MasterLock { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(LedgerError::MasterLocked { path })
            }
            Err(e) => Err(LedgerError::storage_write(&path, e)),
        }
    }

    /// Current master, or an empty canonical table when none is persisted.
    ///
    /// Every row must decode; a master that does not fails with
    /// `StorageRead` instead of being merged with rows missing.
    pub fn load(&self) -> LedgerResult<DataFrame> {
        if !self.exists() {
            info!(
                "No master at {}, starting from an empty table",
                self.master_path.display()
            );
            return empty_master_frame();
        }
        let df = read_table(&self.master_path)?;
        // row-oriented formats store an empty table without its columns
        if df.height() == 0 && CANONICAL_COLUMNS.iter().any(|c| df.column(c).is_err()) {
            info!(
                "Master {} is empty, using the canonical schema",
                self.master_path.display()
            );
            return empty_master_frame();
        }
        records_from_frame(&df).map_err(|e| match e {
            LedgerError::CorruptRow { .. } | LedgerError::MissingColumn { .. } => {
                LedgerError::storage_read(&self.master_path, e)
            }
            other => other,
        })?;
        info!(
            "Loaded master {} ({} rows)",
            self.master_path.display(),
            df.height()
        );
        Ok(df)
    }

    /// Copies the current master to `<stem>_<timestamp><ext>` in the backup
    /// directory. Returns `None` when there is no master to back up.
    ///
    /// The overwrite that follows must not run unless this returned `Ok`.
    pub fn backup(&self) -> LedgerResult<Option<PathBuf>> {
        self.backup_at(Utc::now())
    }

    pub fn backup_at(&self, now: DateTime<Utc>) -> LedgerResult<Option<PathBuf>> {
        if !self.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| LedgerError::storage_write(&self.backup_dir, e))?;

        let target = self.backup_target(now);
        copy_file_atomic(&self.master_path, &target)?;
        info!("Backup created: {}", target.display());
        Ok(Some(target))
    }

    fn backup_target(&self, now: DateTime<Utc>) -> PathBuf {
        let stem = self
            .master_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("master");
        let ext = self
            .master_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let stamp = now.format("%Y%m%d_%H%M%S_%6f");

        let base = self.backup_dir.join(format!("{}_{}{}", stem, stamp, ext));
        if !base.exists() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = self
                .backup_dir
                .join(format!("{}_{}_{}{}", stem, stamp, n, ext));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Replaces the master with `df` in one rename; parent directories are
    /// created as needed.
    pub fn persist(&self, df: &mut DataFrame) -> LedgerResult<()> {
        write_table_atomic(df, &self.master_path)?;
        info!(
            "Master saved: {} ({} rows)",
            self.master_path.display(),
            df.height()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SaleRecord, records_to_frame};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn frame(price: f64) -> DataFrame {
        records_to_frame(&[SaleRecord {
            date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            product: "A".to_string(),
            price: Some(price),
            sold_units: Some(1),
            ingestion_ts: None,
            origin: None,
        }])
        .unwrap()
    }

    fn store(root: &Path) -> MasterStore {
        MasterStore::new(root.join("processed/master.csv"), root.join("processed/backups"))
    }

    #[test]
    fn test_load_without_master_is_empty_canonical() {
        let dir = tempdir().unwrap();
        let df = store(dir.path()).load().unwrap();
        assert_eq!(df.height(), 0);
        assert!(df.column("ingestion_ts").is_ok());
    }

    #[test]
    fn test_backup_without_master_is_noop() {
        let dir = tempdir().unwrap();
        assert_eq!(store(dir.path()).backup().unwrap(), None);
        assert!(!dir.path().join("processed/backups").exists());
    }

    #[test]
    fn test_backup_before_overwrite() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        store.persist(&mut frame(10.0)).unwrap();
        let before = fs::read(store.master_path()).unwrap();

        let backup = store.backup().unwrap().unwrap();
        store.persist(&mut frame(11.0)).unwrap();

        let backups: Vec<_> = fs::read_dir(store.backup_dir()).unwrap().collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read(&backup).unwrap(), before);

        let live = records_from_frame(&store.load().unwrap()).unwrap();
        assert_eq!(live[0].price, Some(11.0));
    }

    #[test]
    fn test_backup_name_keeps_stem_and_extension() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.persist(&mut frame(10.0)).unwrap();

        let now = DateTime::parse_from_rfc3339("2025-09-01T10:20:30.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let first = store.backup_at(now).unwrap().unwrap();
        let second = store.backup_at(now).unwrap().unwrap();

        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "master_20250901_102030_123456.csv"
        );
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "master_20250901_102030_123456_1.csv"
        );
    }

    #[test]
    fn test_empty_json_master_loads_with_schema() {
        let dir = tempdir().unwrap();
        let store = MasterStore::new(dir.path().join("master.json"), dir.path().join("backups"));
        store.persist(&mut empty_master_frame().unwrap()).unwrap();

        let df = store.load().unwrap();
        assert_eq!(df.height(), 0);
        assert!(df.column("sold_units").is_ok());
    }

    #[test]
    fn test_undecodable_master_row_fails_load() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::create_dir_all(dir.path().join("processed")).unwrap();
        fs::write(
            store.master_path(),
            "date,product,price,sold_units\n2025/09/01,OLD,1.0,1\n2025-09-01,KEEP,2.0,2\n",
        )
        .unwrap();

        match store.load() {
            Err(LedgerError::StorageRead { path, message }) => {
                assert_eq!(path, store.master_path());
                assert!(message.contains("row 1"));
            }
            other => panic!("expected StorageRead, got {:?}", other),
        }
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let lock = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(LedgerError::MasterLocked { .. })));
        drop(lock);
        assert!(store.lock().is_ok());
    }
}
