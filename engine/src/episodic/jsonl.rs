//! JSON Lines episodic log
//!
//! One serialized `RunRecord` per line. The file is only ever opened in
//! append mode; existing lines are never rewritten.

use super::{next_timestamp, EpisodicLog, RunRecord};
use ace_sdk::errors::AceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct JsonlEpisodicLog {
    path: PathBuf,
    /// Timestamp of the last appended entry; also serializes appends
    last: Mutex<Option<DateTime<Utc>>>,
}

impl JsonlEpisodicLog {
    /// Open (or create) the log at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create episodic log directory")?;
        }

        let last = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            terminate_torn_line(&path)
                .await
                .with_context(|| format!("Failed to repair episodic log {}", path.display()))?;
            let records = read_records(&path)
                .await
                .with_context(|| format!("Failed to read episodic log {}", path.display()))?;
            records.last().map(|r| r.timestamp)
        } else {
            None
        };

        debug!(path = %path.display(), "Opened JSONL episodic log");

        Ok(Self {
            path,
            last: Mutex::new(last),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EpisodicLog for JsonlEpisodicLog {
    async fn append(&self, mut record: RunRecord) -> Result<RunRecord, AceError> {
        let mut last = self.last.lock().await;
        record.timestamp = next_timestamp(*last, record.timestamp);

        let mut line = serde_json::to_string(&record)
            .map_err(|e| AceError::Persistence(format!("Failed to serialize run record: {}", e)))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        *last = Some(record.timestamp);
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, AceError> {
        // Hold the append lock so a half-written line is never observed
        let _guard = self.last.lock().await;
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let records = read_records(&self.path)
            .await
            .map_err(|e| AceError::Persistence(format!("{:#}", e)))?;
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}

/// End a partial final line so the next append starts on a line of its own
async fn terminate_torn_line(path: &Path) -> Result<()> {
    let raw = tokio::fs::read(path).await?;
    if raw.last().map_or(true, |b| *b == b'\n') {
        return Ok(());
    }

    warn!(path = %path.display(), "Episodic log ends mid-line, terminating it");
    let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

async fn read_records(path: &Path) -> Result<Vec<RunRecord>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RunRecord>(line) {
            Ok(record) => records.push(record),
            // A torn final line from a crash must not make the log unreadable
            Err(e) => warn!(line = n + 1, "Skipping unreadable episodic log line: {}", e),
        }
    }
    Ok(records)
}
