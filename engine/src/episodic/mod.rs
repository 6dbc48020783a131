//! Episodic memory
//!
//! Append-only audit log with one `RunRecord` per orchestrator pass. Entries
//! are final once written and carry strictly increasing timestamps. Nothing
//! in the pipeline reads the log back; `recent` exists for offline analysis.

use crate::conductor::evaluator::ScoreCard;
use crate::conductor::reflector::Insight;
use crate::conductor::stage::Stage;
use crate::playbook::{AppliedOp, ItemId};
use ace_sdk::errors::AceError;
use ace_sdk::{ExecutionOutcome, Feedback};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub mod jsonl;

pub use jsonl::JsonlEpisodicLog;

/// Rows kept in an execution summary
const PREVIEW_ROWS: usize = 5;

/// Condensed execution outcome stored with a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub row_count: u64,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub preview: Vec<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ExecutionOutcome> for ExecutionSummary {
    fn from(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Succeeded(rows) => Self {
                success: true,
                row_count: rows.row_count,
                columns: rows.columns.clone(),
                preview: rows.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
                error: None,
            },
            ExecutionOutcome::Failed { message } => Self {
                success: false,
                row_count: 0,
                columns: Vec::new(),
                preview: Vec::new(),
                error: Some(message.clone()),
            },
        }
    }
}

/// Error marker of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub kind: String,
    pub message: String,
}

impl From<&AceError> for ErrorMarker {
    fn from(err: &AceError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// One episodic memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub query: String,
    #[serde(default)]
    pub generated_sql: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub playbook_ids_used: Vec<ItemId>,
    #[serde(default)]
    pub tables_accessed: Vec<String>,
    #[serde(default)]
    pub execution_result_summary: Option<ExecutionSummary>,
    #[serde(default)]
    pub user_feedback: Option<Feedback>,
    #[serde(default)]
    pub scorecard: Option<ScoreCard>,
    #[serde(default)]
    pub insight: Option<Insight>,
    #[serde(default)]
    pub delta_ops_applied: Vec<AppliedOp>,
    pub playbook_version_before: u64,
    pub playbook_version_after: u64,
    pub timestamp: DateTime<Utc>,
    /// Stage trail of the pass that produced this record
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<ErrorMarker>,
}

impl RunRecord {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Append-only run log
#[async_trait]
pub trait EpisodicLog: Send + Sync {
    /// Append `record`, returning it with its final timestamp
    async fn append(&self, record: RunRecord) -> Result<RunRecord, AceError>;

    /// The last `limit` records, oldest first
    async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, AceError>;
}

/// Timestamp strictly after `last`, preferring `candidate`
pub(crate) fn next_timestamp(
    last: Option<DateTime<Utc>>,
    candidate: DateTime<Utc>,
) -> DateTime<Utc> {
    match last {
        Some(last) if candidate <= last => last + Duration::microseconds(1),
        _ => candidate,
    }
}

/// Process-local log for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryEpisodicLog {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryEpisodicLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Snapshot of every record, oldest first
    pub async fn all(&self) -> Vec<RunRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl EpisodicLog for MemoryEpisodicLog {
    async fn append(&self, mut record: RunRecord) -> Result<RunRecord, AceError> {
        let mut records = self.records.lock().await;
        record.timestamp = next_timestamp(records.last().map(|r| r.timestamp), record.timestamp);
        records.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, AceError> {
        let records = self.records.lock().await;
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}

#[cfg(test)]
pub(crate) fn sample_record(run_id: &str, query: &str) -> RunRecord {
    RunRecord {
        run_id: run_id.to_string(),
        query: query.to_string(),
        generated_sql: Some("SELECT 1".to_string()),
        reasoning: String::new(),
        playbook_ids_used: Vec::new(),
        tables_accessed: Vec::new(),
        execution_result_summary: None,
        user_feedback: None,
        scorecard: None,
        insight: None,
        delta_ops_applied: Vec::new(),
        playbook_version_before: 1,
        playbook_version_after: 1,
        timestamp: Utc::now(),
        stages: Vec::new(),
        warnings: Vec::new(),
        error: None,
    }
}
