use super::models::{ArchiveStats, BandAverage, FailureRow, RecordSummary};
use super::{Database, Result};
use crate::analyzer::FileFailure;
use crate::record::{Outcome, ProcessingRecord};
use crate::storage::{RecordSink, StorageError};
use rusqlite::{params, OptionalExtension};
use std::path::PathBuf;

impl Database {
    /// Insert or replace a record and its band-power rows in one transaction.
    /// Clears any stored failure for the same file. Returns the record id.
    pub fn store_record(&self, record: &ProcessingRecord) -> Result<i64> {
        let json = serde_json::to_string(record)?;
        let snapshot = record.parameters();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO records (
                dataset_id, file_id, subject, sample_rate, window_length,
                channel_count, omission_count, processed_at, record_json, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
            ON CONFLICT(dataset_id, file_id) DO UPDATE SET
                subject = excluded.subject,
                sample_rate = excluded.sample_rate,
                window_length = excluded.window_length,
                channel_count = excluded.channel_count,
                omission_count = excluded.omission_count,
                processed_at = excluded.processed_at,
                record_json = excluded.record_json,
                updated_at = datetime('now')
            ",
            params![
                record.dataset_id(),
                record.file_id(),
                record.subject(),
                snapshot.sample_rate,
                snapshot.window_length as i64,
                record.spectral().len() as i64,
                record.omissions().len() as i64,
                record.timestamp().to_rfc3339(),
                json,
            ],
        )?;

        let id: i64 = tx.query_row(
            "SELECT id FROM records WHERE dataset_id = ?1 AND file_id = ?2",
            params![record.dataset_id(), record.file_id()],
            |row| row.get(0),
        )?;

        // Clear old rows (for re-processing)
        tx.execute("DELETE FROM band_power WHERE record_id = ?1", params![id])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO band_power (record_id, channel, band, power, omission)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (channel, per_band) in record.spectral().iter() {
                for (band, outcome) in per_band.iter() {
                    let (power, omission) = match outcome {
                        Outcome::Value(bp) => (Some(bp.power), None),
                        Outcome::Omitted(reason) => (None, Some(reason.to_string())),
                    };
                    stmt.execute(params![id, channel, band.as_str(), power, omission])?;
                }
            }
        }

        tx.execute(
            "DELETE FROM failures WHERE dataset_id = ?1 AND file_id = ?2",
            params![record.dataset_id(), record.file_id()],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Insert or replace the failure row for a file.
    pub fn store_failure(&self, failure: &FileFailure) -> Result<()> {
        self.conn.execute(
            "INSERT INTO failures (dataset_id, file_id, path, kind, message, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
             ON CONFLICT(dataset_id, file_id) DO UPDATE SET
                path = excluded.path,
                kind = excluded.kind,
                message = excluded.message,
                failed_at = excluded.failed_at",
            params![
                failure.dataset_id,
                failure.file_id,
                failure.path.to_string_lossy(),
                failure.error.kind(),
                failure.error.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn record_exists(&self, dataset_id: &str, file_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM records WHERE dataset_id = ?1 AND file_id = ?2",
                params![dataset_id, file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Stored records, optionally restricted to one dataset.
    pub fn list_records(&self, dataset_id: Option<&str>) -> Result<Vec<RecordSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id, dataset_id, subject, sample_rate, window_length,
                    channel_count, omission_count, processed_at
             FROM records
             WHERE ?1 IS NULL OR dataset_id = ?1
             ORDER BY dataset_id, file_id",
        )?;

        let rows = stmt
            .query_map(params![dataset_id], |row| {
                Ok(RecordSummary {
                    file_id: row.get(0)?,
                    dataset_id: row.get(1)?,
                    subject: row.get(2)?,
                    sample_rate: row.get(3)?,
                    window_length: row.get(4)?,
                    channel_count: row.get(5)?,
                    omission_count: row.get(6)?,
                    processed_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Full record, parsed back from its stored JSON.
    pub fn get_record(&self, dataset_id: &str, file_id: &str) -> Result<Option<ProcessingRecord>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM records WHERE dataset_id = ?1 AND file_id = ?2",
                params![dataset_id, file_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(text) => Ok(Some(ProcessingRecord::from_json(&text)?)),
            None => Ok(None),
        }
    }

    /// Datasets holding a record with this file id.
    pub fn datasets_with_file(&self, file_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset_id FROM records WHERE file_id = ?1 ORDER BY dataset_id",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    pub fn list_failures(&self) -> Result<Vec<FailureRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id, dataset_id, path, kind, message, failed_at
             FROM failures ORDER BY failed_at DESC, dataset_id, file_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FailureRow {
                    file_id: row.get(0)?,
                    dataset_id: row.get(1)?,
                    path: row.get(2)?,
                    kind: row.get(3)?,
                    message: row.get(4)?,
                    failed_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_archive_stats(&self) -> Result<ArchiveStats> {
        let (records, datasets, subjects, channels, omissions): (i64, i64, i64, i64, i64) =
            self.conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT dataset_id), COUNT(DISTINCT subject),
                        COALESCE(SUM(channel_count), 0), COALESCE(SUM(omission_count), 0)
                 FROM records",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;
        let failures: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM failures", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT band, AVG(power), COUNT(power), SUM(power IS NULL)
             FROM band_power GROUP BY band",
        )?;
        let mut bands = stmt
            .query_map([], |row| {
                Ok(BandAverage {
                    band: row.get(0)?,
                    mean_power: row.get(1)?,
                    channels: row.get(2)?,
                    omitted: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // Canonical band order rather than alphabetical
        bands.sort_by_key(|b| {
            crate::bands::BandName::parse(&b.band).map(|n| n as usize).unwrap_or(usize::MAX)
        });

        Ok(ArchiveStats {
            records,
            datasets,
            subjects,
            channels,
            omissions,
            failures,
            bands,
        })
    }
}

impl RecordSink for Database {
    fn store(&mut self, record: &ProcessingRecord, _sources: &[PathBuf]) -> std::result::Result<(), StorageError> {
        self.store_record(record)?;
        Ok(())
    }

    fn store_failure(&mut self, failure: &FileFailure) -> std::result::Result<(), StorageError> {
        Database::store_failure(self, failure)?;
        Ok(())
    }
}
