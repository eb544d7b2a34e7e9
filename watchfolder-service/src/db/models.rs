//! Database model structs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Import state of a file the watcher has seen
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImportStatus {
    /// Detected, not yet imported
    Pending,
    /// Worker reported success
    Imported,
    /// Abandoned after the retry ceiling; re-seeded on the next start
    Failed,
}

/// A row of `import_records`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub path: PathBuf,
    pub status: ImportStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let path: String = row.get(0)?;
        let status_str: String = row.get(1)?;
        let attempts: i64 = row.get(2)?;
        let detected_at_str: String = row.get(4)?;
        let updated_at_str: String = row.get(5)?;

        Ok(Self {
            path: PathBuf::from(path),
            status: status_str.parse().unwrap_or(ImportStatus::Pending),
            attempts: attempts.max(0) as u32,
            last_error: row.get(3)?,
            detected_at: parse_timestamp(&detected_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
