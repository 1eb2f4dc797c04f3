use super::models::*;
use super::sqlite::Database;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Result, Row};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, group_id, keeper_file_id, keeper_path, created_at, \
                                   space_freed, exif_writes, metadata_snapshot";

impl Database {
    // ── Merge Transactions ───────────────────────────────────────

    /// Insert a transaction and its removed files atomically. Returns its sequence number.
    pub fn insert_merge_transaction(&self, txn: &MergeTransaction) -> Result<i64> {
        let exif_writes = to_json(&txn.exif_writes)?;
        let snapshot = txn.metadata_snapshot.as_ref().map(to_json).transpose()?;

        let tx = self.connection().unchecked_transaction()?;
        let seq;
        {
            tx.execute(
                "INSERT INTO merge_transaction \
                 (id, group_id, keeper_file_id, keeper_path, created_at, space_freed, \
                  exif_writes, metadata_snapshot) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    txn.id.to_string(),
                    txn.group_id.to_string(),
                    txn.keeper_file_id.to_string(),
                    txn.keeper_path.to_string_lossy(),
                    txn.created_at.to_rfc3339(),
                    txn.space_freed as i64,
                    exif_writes,
                    snapshot,
                ],
            )?;
            seq = tx.last_insert_rowid();

            let mut stmt = tx.prepare_cached(
                "INSERT INTO merge_removed_file \
                 (transaction_id, position, file_id, original_path, trash_path, file_size) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, removed) in txn.removed.iter().enumerate() {
                stmt.execute(params![
                    txn.id.to_string(),
                    position as i64,
                    removed.file_id.to_string(),
                    removed.original_path.to_string_lossy(),
                    removed.trash_path.to_string_lossy(),
                    removed.file_size as i64,
                ])?;
            }
        }
        tx.commit()?;
        debug!(
            "Recorded merge transaction {} (seq {}, {} removed files)",
            txn.id,
            seq,
            txn.removed.len()
        );
        Ok(seq)
    }

    pub fn get_merge_transaction(&self, id: Uuid) -> Result<Option<MergeTransaction>> {
        let header = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM merge_transaction WHERE id = ?1", TRANSACTION_COLUMNS),
                params![id.to_string()],
                transaction_from_row,
            )
            .optional()?;
        header.map(|txn| self.with_removed_files(txn)).transpose()
    }

    /// The most recently recorded transaction, if any.
    pub fn latest_merge_transaction(&self) -> Result<Option<MergeTransaction>> {
        let header = self
            .connection()
            .query_row(
                &format!(
                    "SELECT {} FROM merge_transaction ORDER BY seq DESC LIMIT 1",
                    TRANSACTION_COLUMNS
                ),
                [],
                transaction_from_row,
            )
            .optional()?;
        header.map(|txn| self.with_removed_files(txn)).transpose()
    }

    /// Transactions newest-first.
    pub fn fetch_recent_transactions(&self, limit: usize) -> Result<Vec<MergeTransaction>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM merge_transaction ORDER BY seq DESC LIMIT ?1",
            TRANSACTION_COLUMNS
        ))?;
        let headers = stmt
            .query_map(params![limit as i64], transaction_from_row)?
            .collect::<Result<Vec<_>>>()?;
        headers
            .into_iter()
            .map(|txn| self.with_removed_files(txn))
            .collect()
    }

    /// Remove a transaction record (removed-file rows cascade). Returns false if absent.
    pub fn delete_merge_transaction(&self, id: Uuid) -> Result<bool> {
        let deleted = self.connection().execute(
            "DELETE FROM merge_transaction WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    pub fn merge_transaction_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM merge_transaction", [], |row| row.get(0))
    }

    pub fn total_space_freed(&self) -> Result<u64> {
        let total: i64 = self.connection().query_row(
            "SELECT COALESCE(SUM(space_freed), 0) FROM merge_transaction",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Whether `file_id` sits in the trash of any recorded transaction.
    pub fn is_file_in_trash(&self, file_id: Uuid) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM merge_removed_file WHERE file_id = ?1",
            params![file_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn with_removed_files(&self, mut txn: MergeTransaction) -> Result<MergeTransaction> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT file_id, original_path, trash_path, file_size FROM merge_removed_file \
             WHERE transaction_id = ?1 ORDER BY position",
        )?;
        txn.removed = stmt
            .query_map(params![txn.id.to_string()], |row| {
                Ok(RemovedFile {
                    file_id: uuid_column(row, 0)?,
                    original_path: PathBuf::from(row.get::<_, String>(1)?),
                    trash_path: PathBuf::from(row.get::<_, String>(2)?),
                    file_size: row.get::<_, i64>(3)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(txn)
    }
}

fn transaction_from_row(row: &Row<'_>) -> Result<MergeTransaction> {
    let snapshot: Option<String> = row.get(7)?;
    Ok(MergeTransaction {
        id: uuid_column(row, 0)?,
        group_id: uuid_column(row, 1)?,
        keeper_file_id: uuid_column(row, 2)?,
        keeper_path: PathBuf::from(row.get::<_, String>(3)?),
        removed: Vec::new(),
        created_at: time_column(row, 4)?,
        space_freed: row.get::<_, i64>(5)?.max(0) as u64,
        exif_writes: json_column(&row.get::<_, String>(6)?, 6)?,
        metadata_snapshot: snapshot.map(|s| json_column(&s, 7)).transpose()?,
    })
}

fn uuid_column(row: &Row<'_>, idx: usize) -> Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(text: &str, idx: usize) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}
