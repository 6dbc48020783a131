//! SQLite episodic log
//!
//! Records live in `run_records` as full JSON plus a few indexed columns.
//! Triggers abort any UPDATE or DELETE, so immutability is enforced by the
//! database itself and not only by this repository.

use crate::episodic::{next_timestamp, EpisodicLog, RunRecord};
use ace_sdk::errors::AceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

pub struct SqliteEpisodicLog {
    pool: SqlitePool,
    /// Serializes appends from this process
    append_lock: Mutex<()>,
}

impl SqliteEpisodicLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            append_lock: Mutex::new(()),
        }
    }

    pub async fn count(&self) -> Result<i64, AceError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM run_records")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }
}

fn db_error(e: sqlx::Error) -> AceError {
    AceError::Database(e.to_string())
}

#[async_trait]
impl EpisodicLog for SqliteEpisodicLog {
    async fn append(&self, mut record: RunRecord) -> Result<RunRecord, AceError> {
        let _guard = self.append_lock.lock().await;

        let last_us: Option<i64> = sqlx::query_scalar("SELECT MAX(timestamp_us) FROM run_records")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        let last = last_us.and_then(DateTime::<Utc>::from_timestamp_micros);
        record.timestamp = next_timestamp(last, record.timestamp);

        let body = serde_json::to_string(&record)
            .map_err(|e| AceError::Persistence(format!("Failed to serialize run record: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO run_records
                (run_id, query, failed, playbook_version_before, playbook_version_after, timestamp_us, record)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.query)
        .bind(record.failed())
        .bind(record.playbook_version_before as i64)
        .bind(record.playbook_version_after as i64)
        .bind(record.timestamp.timestamp_micros())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, AceError> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM (
                SELECT seq, record FROM run_records ORDER BY seq DESC LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("record");
            let record = serde_json::from_str(&body)
                .map_err(|e| AceError::Persistence(format!("Corrupt run record: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }
}
