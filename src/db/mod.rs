pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: records, per-channel band power, failures
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id      TEXT NOT NULL,
                file_id         TEXT NOT NULL,
                subject         TEXT,
                sample_rate     REAL NOT NULL,
                window_length   INTEGER NOT NULL,
                channel_count   INTEGER NOT NULL,
                omission_count  INTEGER NOT NULL,
                processed_at    TEXT NOT NULL,
                record_json     TEXT NOT NULL,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(dataset_id, file_id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_dataset ON records(dataset_id);
            CREATE INDEX IF NOT EXISTS idx_records_subject ON records(subject);

            CREATE TABLE IF NOT EXISTS band_power (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id       INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                channel         TEXT NOT NULL,
                band            TEXT NOT NULL,
                -- NULL when omitted; see omission
                power           REAL,
                omission        TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_band_power_record ON band_power(record_id);
            CREATE INDEX IF NOT EXISTS idx_band_power_band ON band_power(band);

            CREATE TABLE IF NOT EXISTS failures (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id      TEXT NOT NULL,
                file_id         TEXT NOT NULL,
                path            TEXT NOT NULL,
                kind            TEXT NOT NULL,
                message         TEXT NOT NULL,
                failed_at       TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(dataset_id, file_id)
            );
            ",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
        for table in ["records", "band_power", "failures"] {
            let n: i64 = db
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(n, 1, "{table}");
        }
    }

    #[test]
    fn test_reopen_file_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("index.db");
        drop(Database::open(&path).unwrap());
        assert!(Database::open(&path).is_ok());
    }
}
