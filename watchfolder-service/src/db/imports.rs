//! Import record storage.
//!
//! One row per file the watcher has seen. The watch runtime writes rows as
//! status events happen; the start-up scan reads back everything that has not
//! been imported yet.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::params;

use super::Database;
use super::models::{ImportRecord, ImportStatus};
use crate::error::{DatabaseError, ServiceResult};

/// Persistence the watch runtime needs from the record store.
pub trait ImportRecords: Send + Sync {
    /// Paths that are pending or failed.
    fn find_paths_not_yet_imported(&self) -> ServiceResult<Vec<PathBuf>>;

    /// Note files found on disk without disturbing existing rows.
    fn record_discovered(&self, paths: &[PathBuf]) -> ServiceResult<usize>;

    /// A file was queued; it is pending again even if imported before.
    fn record_detected(&self, path: &Path) -> ServiceResult<()>;

    /// A dispatch attempt did not succeed but the file stays queued.
    fn record_attempt(&self, path: &Path, attempts: u32, error: &str) -> ServiceResult<()>;

    fn mark_imported(&self, path: &Path) -> ServiceResult<()>;

    /// The file was abandoned.
    fn record_failure(&self, path: &Path, attempts: u32, error: &str) -> ServiceResult<()>;

    /// Drop the row of a file that went away.
    fn forget(&self, path: &Path) -> ServiceResult<()>;

    fn list_records(&self) -> ServiceResult<Vec<ImportRecord>>;
}

impl ImportRecords for Database {
    fn find_paths_not_yet_imported(&self) -> ServiceResult<Vec<PathBuf>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT path FROM import_records WHERE status != ?1 ORDER BY detected_at, path")
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![ImportStatus::Imported.as_ref()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(DatabaseError::Query)?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(PathBuf::from(row.map_err(DatabaseError::Query)?));
        }

        Ok(paths)
    }

    fn record_discovered(&self, paths: &[PathBuf]) -> ServiceResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO import_records (path, status, attempts, detected_at, updated_at) \
                     VALUES (?1, ?2, 0, ?3, ?3) ON CONFLICT(path) DO NOTHING",
                )
                .map_err(DatabaseError::Query)?;
            for path in paths {
                inserted += stmt
                    .execute(params![
                        path.to_string_lossy(),
                        ImportStatus::Pending.as_ref(),
                        now
                    ])
                    .map_err(DatabaseError::Query)?;
            }
        }
        tx.commit().map_err(DatabaseError::Query)?;

        Ok(inserted)
    }

    fn record_detected(&self, path: &Path) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO import_records (path, status, attempts, detected_at, updated_at) \
             VALUES (?1, ?2, 0, ?3, ?3) \
             ON CONFLICT(path) DO UPDATE SET status = excluded.status, attempts = 0, \
             last_error = NULL, updated_at = excluded.updated_at",
            params![path.to_string_lossy(), ImportStatus::Pending.as_ref(), now],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    fn record_attempt(&self, path: &Path, attempts: u32, error: &str) -> ServiceResult<()> {
        self.update_status(path, ImportStatus::Pending, attempts, Some(error))
    }

    fn mark_imported(&self, path: &Path) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE import_records SET status = ?2, last_error = NULL, updated_at = ?3 WHERE path = ?1",
            params![
                path.to_string_lossy(),
                ImportStatus::Imported.as_ref(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    fn record_failure(&self, path: &Path, attempts: u32, error: &str) -> ServiceResult<()> {
        self.update_status(path, ImportStatus::Failed, attempts, Some(error))
    }

    fn forget(&self, path: &Path) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "DELETE FROM import_records WHERE path = ?1",
            params![path.to_string_lossy()],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    fn list_records(&self) -> ServiceResult<Vec<ImportRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT path, status, attempts, last_error, detected_at, updated_at \
                 FROM import_records ORDER BY updated_at DESC, path",
            )
            .map_err(DatabaseError::Query)?;

        let records = stmt
            .query_map([], ImportRecord::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(records)
    }
}

impl Database {
    fn update_status(
        &self,
        path: &Path,
        status: ImportStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE import_records SET status = ?2, attempts = ?3, last_error = ?4, updated_at = ?5 \
             WHERE path = ?1",
            params![
                path.to_string_lossy(),
                status.as_ref(),
                attempts,
                error,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn status_of(db: &Database, path: &str) -> Option<ImportRecord> {
        db.list_records()
            .unwrap()
            .into_iter()
            .find(|r| r.path == Path::new(path))
    }

    #[test]
    fn test_detected_then_imported_is_not_reseeded() {
        let (_dir, db) = open();
        db.record_detected(Path::new("/w/a")).unwrap();
        db.record_detected(Path::new("/w/b")).unwrap();
        assert_eq!(db.find_paths_not_yet_imported().unwrap().len(), 2);

        db.mark_imported(Path::new("/w/a")).unwrap();
        assert_eq!(
            db.find_paths_not_yet_imported().unwrap(),
            [PathBuf::from("/w/b")]
        );
        assert_eq!(status_of(&db, "/w/a").unwrap().status, ImportStatus::Imported);
    }

    #[test]
    fn test_failed_files_are_reseeded() {
        let (_dir, db) = open();
        db.record_detected(Path::new("/w/a")).unwrap();
        db.record_attempt(Path::new("/w/a"), 1, "busy").unwrap();
        db.record_failure(Path::new("/w/a"), 3, "corrupt").unwrap();

        let record = status_of(&db, "/w/a").unwrap();
        assert_eq!(record.status, ImportStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.last_error.as_deref(), Some("corrupt"));
        assert_eq!(
            db.find_paths_not_yet_imported().unwrap(),
            [PathBuf::from("/w/a")]
        );
    }

    #[test]
    fn test_redetection_resets_imported_row() {
        let (_dir, db) = open();
        db.record_detected(Path::new("/w/a")).unwrap();
        db.mark_imported(Path::new("/w/a")).unwrap();
        db.record_detected(Path::new("/w/a")).unwrap();

        let record = status_of(&db, "/w/a").unwrap();
        assert_eq!(record.status, ImportStatus::Pending);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn test_discovery_keeps_existing_rows() {
        let (_dir, db) = open();
        db.record_detected(Path::new("/w/a")).unwrap();
        db.mark_imported(Path::new("/w/a")).unwrap();

        let inserted = db
            .record_discovered(&[PathBuf::from("/w/a"), PathBuf::from("/w/b")])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(status_of(&db, "/w/a").unwrap().status, ImportStatus::Imported);
        assert_eq!(
            db.find_paths_not_yet_imported().unwrap(),
            [PathBuf::from("/w/b")]
        );
    }

    #[test]
    fn test_forget_deletes_row() {
        let (_dir, db) = open();
        db.record_detected(Path::new("/w/a")).unwrap();
        db.forget(Path::new("/w/a")).unwrap();
        assert!(db.list_records().unwrap().is_empty());
        // forgetting twice is harmless
        db.forget(Path::new("/w/a")).unwrap();
    }
}
