//! Database schema migrations.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Bring the schema up to date. Called on every open.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Hot-reloadable settings, JSON encoded values
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: format!("Failed to create settings table: {}", e),
    })?;

    run_import_records_migration(conn)?;

    Ok(())
}

/// Migration: per-file import records
fn run_import_records_migration(conn: &Connection) -> ServiceResult<()> {
    let has_import_records: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='import_records'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_import_records {
        conn.execute_batch(
            r#"
            CREATE TABLE import_records (
                path TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'imported', 'failed')),
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                detected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_import_records_status ON import_records(status);
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: format!("Failed to create import_records table: {}", e),
        })?;
    }

    Ok(())
}
