//! SQLite storage for the scan ledger

use crate::ledger::record::{CandidateFile, ModTime, ScanDepth, ScanRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i32 = 2;

/// Persistent record of what was last checked and what was found.
///
/// Owns the only connection to the store. Staleness lookups and batch
/// writes both go through `&self`/`&mut self`, so a single coordinator
/// serializes them by construction.
pub struct ScanLedger {
    db: Connection,
    path: PathBuf,
}

impl ScanLedger {
    /// Open or create the ledger at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }

        let db = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL keeps committed batches intact across crashes and lets a later
        // invocation read while another one commits
        db.pragma_update(None, "journal_mode", "WAL")
            .with_context(|| "Failed to enable WAL mode")?;
        db.pragma_update(None, "synchronous", "NORMAL")
            .with_context(|| "Failed to set synchronous mode")?;
        db.busy_timeout(Duration::from_secs(30))
            .with_context(|| "Failed to set busy timeout")?;

        let mut ledger = Self {
            db,
            path: db_path.to_path_buf(),
        };
        ledger
            .init_schema()
            .with_context(|| format!("Failed to initialize ledger schema: {}", db_path.display()))?;

        tracing::debug!(path = %db_path.display(), "opened scan ledger");
        Ok(ledger)
    }

    /// Location of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&mut self) -> Result<()> {
        self.db.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            [],
        )?;

        let version: Option<i32> = self
            .db
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;

        let version = match version {
            Some(v) => v,
            None => {
                self.db
                    .execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
                0
            }
        };

        if version < SCHEMA_VERSION {
            self.migrate_schema(version)?;
        }

        Ok(())
    }

    fn migrate_schema(&mut self, from_version: i32) -> Result<()> {
        let tx = self
            .db
            .transaction()
            .with_context(|| "Failed to start migration transaction")?;

        if from_version == 0 {
            tx.execute(
                "CREATE TABLE IF NOT EXISTS scanned_files (
                    path BLOB PRIMARY KEY,
                    mtime_secs INTEGER NOT NULL,
                    mtime_nsecs INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    last_scanned INTEGER NOT NULL,
                    corrupted INTEGER NOT NULL,
                    scan_depth TEXT NOT NULL,
                    error_message TEXT
                )",
                [],
            )
            .with_context(|| "Failed to create scanned_files table")?;
        } else if from_version == 1 {
            // Version 1 keyed rows by lossy UTF-8 text
            tx.execute_batch(
                "CREATE TABLE scanned_files_v2 (
                    path BLOB PRIMARY KEY,
                    mtime_secs INTEGER NOT NULL,
                    mtime_nsecs INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    last_scanned INTEGER NOT NULL,
                    corrupted INTEGER NOT NULL,
                    scan_depth TEXT NOT NULL,
                    error_message TEXT
                );
                INSERT OR REPLACE INTO scanned_files_v2
                    SELECT CAST(path AS BLOB), mtime_secs, mtime_nsecs, size,
                           last_scanned, corrupted, scan_depth, error_message
                    FROM scanned_files;
                DROP TABLE scanned_files;
                ALTER TABLE scanned_files_v2 RENAME TO scanned_files;",
            )
            .with_context(|| "Failed to migrate scanned_files to binary paths")?;
        }

        tx.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])
            .with_context(|| "Failed to update schema version")?;

        tx.commit()
            .with_context(|| "Failed to commit migration transaction")?;

        Ok(())
    }

    /// Look up the stored record for `path`
    pub fn get(&self, path: &Path) -> Result<Option<ScanRecord>> {
        let key = path_key(path);

        let row = self
            .db
            .query_row(
                "SELECT mtime_secs, mtime_nsecs, size, last_scanned, corrupted, scan_depth, error_message
                 FROM scanned_files WHERE path = ?1",
                [&key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("Failed to query ledger for {}", path.display()))?;

        let Some((secs, nsecs, size, last_scanned, corrupted, depth, error_message)) = row else {
            return Ok(None);
        };

        Ok(Some(ScanRecord {
            path: path.to_path_buf(),
            mtime: ModTime::new(secs, nsecs),
            size: size.max(0) as u64,
            last_scanned: DateTime::from_timestamp(last_scanned, 0).unwrap_or_else(Utc::now),
            corrupted,
            scan_depth: depth.parse()?,
            error_message,
        }))
    }

    /// Decide whether `candidate` has to be validated again.
    ///
    /// A stored verdict is reused only when the file's size and mtime are
    /// exactly what was recorded, the verdict was clean, and it came from a
    /// check at least as deep as `depth`. Content is never hashed, so a
    /// rewrite that preserves both size and mtime goes unnoticed.
    pub fn needs_scan(&self, candidate: &CandidateFile, force: bool, depth: ScanDepth) -> Result<bool> {
        if force {
            return Ok(true);
        }

        let Some(record) = self.get(&candidate.path)? else {
            return Ok(true);
        };

        if !record.matches(candidate) {
            return Ok(true);
        }

        // Known-bad files may have been repaired, or the failure was transient
        if record.corrupted {
            return Ok(true);
        }

        if depth > record.scan_depth {
            return Ok(true);
        }

        Ok(false)
    }

    /// Insert or replace every record in one transaction.
    ///
    /// Either the whole batch is committed or none of it is; on error the
    /// caller still owns the batch and may retry it.
    pub fn record_results(&mut self, records: &[ScanRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let tx = self
            .db
            .transaction()
            .with_context(|| "Failed to start transaction")?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO scanned_files
                    (path, mtime_secs, mtime_nsecs, size, last_scanned, corrupted, scan_depth, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for record in records {
                // SQLite INTEGER is signed 64-bit
                let size_i64 = i64::try_from(record.size).unwrap_or(i64::MAX);

                stmt.execute(params![
                    path_key(&record.path),
                    record.mtime.secs,
                    record.mtime.nanos,
                    size_i64,
                    record.last_scanned.timestamp(),
                    record.corrupted,
                    record.scan_depth.as_str(),
                    record.error_message,
                ])
                .with_context(|| format!("Failed to record {}", record.path.display()))?;
            }
        }

        tx.commit().with_context(|| "Failed to commit transaction")?;
        Ok(())
    }

    /// Remove records for files that no longer exist.
    ///
    /// Only paths that are verifiably absent are removed; a path whose
    /// existence cannot be determined (permissions, unmounted share) is kept.
    pub fn prune(&mut self) -> Result<usize> {
        let keys: Vec<Vec<u8>> = {
            let mut stmt = self.db.prepare("SELECT path FROM scanned_files")?;
            let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let missing: Vec<Vec<u8>> = keys
            .into_iter()
            .filter(|key| matches!(path_from_key(key).try_exists(), Ok(false)))
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let tx = self
            .db
            .transaction()
            .with_context(|| "Failed to start prune transaction")?;
        {
            let mut delete_stmt = tx.prepare("DELETE FROM scanned_files WHERE path = ?1")?;
            for key in &missing {
                delete_stmt.execute([key]).with_context(|| {
                    format!("Failed to delete stale record: {}", path_from_key(key).display())
                })?;
            }
        }
        tx.commit()
            .with_context(|| "Failed to commit prune transaction")?;

        tracing::info!(removed = missing.len(), "pruned records of deleted files");
        Ok(missing.len())
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM scanned_files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Storage key for `path`: the raw OS bytes, so names that are not valid
/// UTF-8 round-trip exactly
#[cfg(unix)]
fn path_key(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_key(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn path_from_key(key: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(key))
}

#[cfg(not(unix))]
fn path_from_key(key: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(key).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_ledger() -> (TempDir, ScanLedger) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ScanLedger::open(&temp_dir.path().join("db").join("scan.db")).unwrap();
        (temp_dir, ledger)
    }

    fn write_video(dir: &Path, name: &str, content: &str) -> CandidateFile {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        CandidateFile::from_path(&path).unwrap()
    }

    fn record_for(candidate: &CandidateFile, corrupted: bool, depth: ScanDepth) -> ScanRecord {
        ScanRecord {
            path: candidate.path.clone(),
            mtime: candidate.mtime,
            size: candidate.size,
            last_scanned: Utc::now(),
            corrupted,
            scan_depth: depth,
            error_message: corrupted.then(|| "moov atom not found".to_string()),
        }
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let (temp_dir, ledger) = setup_test_ledger();
        assert!(temp_dir.path().join("db").join("scan.db").exists());
        assert!(ledger.is_empty().unwrap());
    }

    #[test]
    fn test_reopen_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("scan.db");
        let candidate = write_video(temp_dir.path(), "a.mp4", "aaaa");

        {
            let mut ledger = ScanLedger::open(&db_path).unwrap();
            ledger
                .record_results(&[record_for(&candidate, false, ScanDepth::Quick)])
                .unwrap();
        }

        let ledger = ScanLedger::open(&db_path).unwrap();
        assert_eq!(ledger.len().unwrap(), 1);
        assert!(!ledger.needs_scan(&candidate, false, ScanDepth::Quick).unwrap());
    }

    #[test]
    fn test_unknown_file_always_needs_scan() {
        let (temp_dir, ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "new.mkv", "fresh");

        for force in [false, true] {
            for depth in [ScanDepth::Quick, ScanDepth::Deep] {
                assert!(ledger.needs_scan(&candidate, force, depth).unwrap());
            }
        }
    }

    #[test]
    fn test_recorded_clean_file_is_skipped() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "a.mp4", "valid");

        ledger
            .record_results(&[record_for(&candidate, false, ScanDepth::Quick)])
            .unwrap();

        assert!(!ledger.needs_scan(&candidate, false, ScanDepth::Quick).unwrap());
        assert!(ledger.needs_scan(&candidate, true, ScanDepth::Quick).unwrap());
    }

    #[test]
    fn test_changed_stat_needs_scan() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "a.mp4", "valid");
        ledger
            .record_results(&[record_for(&candidate, false, ScanDepth::Deep)])
            .unwrap();

        let resized = CandidateFile {
            size: candidate.size + 1,
            ..candidate.clone()
        };
        assert!(ledger.needs_scan(&resized, false, ScanDepth::Quick).unwrap());

        let touched = CandidateFile {
            mtime: ModTime::new(candidate.mtime.secs, candidate.mtime.nanos + 1),
            ..candidate.clone()
        };
        assert!(ledger.needs_scan(&touched, false, ScanDepth::Quick).unwrap());
    }

    #[test]
    fn test_corrupted_file_always_rescanned() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "b.mkv", "broken");
        ledger
            .record_results(&[record_for(&candidate, true, ScanDepth::Deep)])
            .unwrap();

        assert!(ledger.needs_scan(&candidate, false, ScanDepth::Quick).unwrap());
        assert!(ledger.needs_scan(&candidate, false, ScanDepth::Deep).unwrap());
    }

    #[test]
    fn test_deep_supersedes_quick() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "a.mp4", "valid");

        ledger
            .record_results(&[record_for(&candidate, false, ScanDepth::Quick)])
            .unwrap();
        assert!(ledger.needs_scan(&candidate, false, ScanDepth::Deep).unwrap());

        ledger
            .record_results(&[record_for(&candidate, false, ScanDepth::Deep)])
            .unwrap();
        assert!(!ledger.needs_scan(&candidate, false, ScanDepth::Deep).unwrap());
        // A quick run never invalidates a deep verdict
        assert!(!ledger.needs_scan(&candidate, false, ScanDepth::Quick).unwrap());
    }

    #[test]
    fn test_record_replaces_whole_row() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "b.mkv", "broken");

        ledger
            .record_results(&[record_for(&candidate, true, ScanDepth::Quick)])
            .unwrap();
        let stored = ledger.get(&candidate.path).unwrap().unwrap();
        assert!(stored.corrupted);
        assert_eq!(stored.error_message.as_deref(), Some("moov atom not found"));

        ledger
            .record_results(&[record_for(&candidate, false, ScanDepth::Deep)])
            .unwrap();
        let stored = ledger.get(&candidate.path).unwrap().unwrap();
        assert!(!stored.corrupted);
        assert!(stored.error_message.is_none());
        assert_eq!(stored.scan_depth, ScanDepth::Deep);
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_paths_in_batch_last_wins() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let candidate = write_video(temp_dir.path(), "a.mp4", "valid");

        ledger
            .record_results(&[
                record_for(&candidate, true, ScanDepth::Quick),
                record_for(&candidate, false, ScanDepth::Quick),
            ])
            .unwrap();

        assert_eq!(ledger.len().unwrap(), 1);
        assert!(!ledger.get(&candidate.path).unwrap().unwrap().corrupted);
    }

    #[test]
    fn test_prune_removes_only_deleted_files() {
        let (temp_dir, mut ledger) = setup_test_ledger();
        let kept = write_video(temp_dir.path(), "kept.mp4", "kept");
        let gone = write_video(temp_dir.path(), "gone.mp4", "gone");

        ledger
            .record_results(&[
                record_for(&kept, false, ScanDepth::Quick),
                record_for(&gone, false, ScanDepth::Quick),
            ])
            .unwrap();

        fs::remove_file(&gone.path).unwrap();

        assert_eq!(ledger.prune().unwrap(), 1);
        assert!(ledger.get(&gone.path).unwrap().is_none());
        assert!(ledger.get(&kept.path).unwrap().is_some());

        // Nothing new deleted, nothing to do
        assert_eq!(ledger.prune().unwrap(), 0);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (_temp_dir, mut ledger) = setup_test_ledger();
        ledger.record_results(&[]).unwrap();
        assert!(ledger.is_empty().unwrap());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_non_utf8_names_kept_distinct_and_not_pruned() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (temp_dir, mut ledger) = setup_test_ledger();
        let mut candidates = Vec::new();
        for raw in [&b"caf\xe9.mkv"[..], &b"caf\xe8.mkv"[..]] {
            let path = temp_dir.path().join(OsStr::from_bytes(raw));
            fs::write(&path, "frames").unwrap();
            candidates.push(CandidateFile::from_path(&path).unwrap());
        }
        let records: Vec<ScanRecord> = candidates
            .iter()
            .map(|c| record_for(c, false, ScanDepth::Quick))
            .collect();
        ledger.record_results(&records).unwrap();

        assert_eq!(ledger.len().unwrap(), 2);
        assert_eq!(ledger.prune().unwrap(), 0);
        for candidate in &candidates {
            assert!(!ledger.needs_scan(candidate, false, ScanDepth::Quick).unwrap());
        }

        fs::remove_file(&candidates[0].path).unwrap();
        assert_eq!(ledger.prune().unwrap(), 1);
        assert!(ledger.get(&candidates[1].path).unwrap().is_some());
    }

    #[test]
    fn test_text_keyed_ledger_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("scan.db");
        let candidate = write_video(temp_dir.path(), "old.mp4", "old");
        {
            let db = Connection::open(&db_path).unwrap();
            db.execute_batch(
                "CREATE TABLE schema_version (version INTEGER NOT NULL);
                 INSERT INTO schema_version (version) VALUES (1);
                 CREATE TABLE scanned_files (
                    path TEXT PRIMARY KEY,
                    mtime_secs INTEGER NOT NULL,
                    mtime_nsecs INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    last_scanned INTEGER NOT NULL,
                    corrupted INTEGER NOT NULL,
                    scan_depth TEXT NOT NULL,
                    error_message TEXT
                 );",
            )
            .unwrap();
            db.execute(
                "INSERT INTO scanned_files VALUES (?1, ?2, ?3, ?4, 0, 0, 'quick', NULL)",
                params![
                    candidate.path.to_str().unwrap(),
                    candidate.mtime.secs,
                    candidate.mtime.nanos,
                    candidate.size as i64,
                ],
            )
            .unwrap();
        }

        let ledger = ScanLedger::open(&db_path).unwrap();
        assert_eq!(ledger.len().unwrap(), 1);
        assert!(!ledger.needs_scan(&candidate, false, ScanDepth::Quick).unwrap());
    }
}
