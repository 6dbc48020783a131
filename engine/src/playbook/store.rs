//! Playbook store
//!
//! The store exclusively owns the canonical playbook. Readers get immutable
//! point-in-time snapshots; the only mutation path is `commit`, which is
//! version-checked (optimistic concurrency) and serialized internally.

use super::delta::{apply_batch, AppliedOp, CommitWarning, DeltaOperation};
use super::Playbook;
use ace_sdk::errors::AceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Failure of a commit
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Another commit advanced the version since it was read
    #[error("version conflict: read {expected}, store at {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// Writing the document failed; nothing changed
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The commit could not start within its wait budget; nothing changed
    #[error("store busy for {waited_secs}s")]
    Busy { waited_secs: u64 },
}

impl From<StoreError> for AceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, actual } => AceError::Conflict { expected, actual },
            StoreError::Persistence(msg) => AceError::Persistence(msg),
            StoreError::Busy { waited_secs } => AceError::Timeout {
                stage: "commit".to_string(),
                secs: waited_secs,
            },
        }
    }
}

/// Immutable view of the playbook at one version
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub playbook: Arc<Playbook>,
}

/// Outcome of a successful commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub version_before: u64,
    pub version_after: u64,
    pub committed_at: DateTime<Utc>,
    pub applied: Vec<AppliedOp>,
    pub warnings: Vec<CommitWarning>,
}

impl CommitResult {
    pub fn changed(&self) -> bool {
        self.version_after != self.version_before
    }
}

/// Versioned playbook storage
#[async_trait]
pub trait PlaybookStore: Send + Sync {
    /// Current playbook and its version
    async fn read(&self) -> Result<Snapshot, StoreError>;

    /// Apply `ops` if the store is still at `version_read`
    ///
    /// Operations are applied in order. Unknown ids and malformed operations
    /// are skipped and reported in `CommitResult::warnings`. Every
    /// successful commit advances the version by exactly one.
    async fn commit(
        &self,
        version_read: u64,
        ops: &[DeltaOperation],
    ) -> Result<CommitResult, StoreError>;

    /// `commit`, giving up with `StoreError::Busy` if it cannot start within `wait`
    ///
    /// Once a commit has started it runs to completion, even if the caller
    /// stops waiting. Stores without internal contention can rely on the
    /// default, which never gives up.
    async fn commit_within(
        &self,
        version_read: u64,
        ops: &[DeltaOperation],
        wait: Duration,
    ) -> Result<CommitResult, StoreError> {
        let _ = wait;
        self.commit(version_read, ops).await
    }
}

/// Playbook store backed by a JSON document (or by nothing, in memory)
pub struct JsonPlaybookStore {
    path: Option<PathBuf>,
    current: Arc<Mutex<Arc<Playbook>>>,
}

impl JsonPlaybookStore {
    /// Open the document at `path`, creating an empty version-1 playbook if absent
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let playbook = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read playbook at {}", path.display()))?;
            let mut playbook: Playbook = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse playbook at {}", path.display()))?;
            playbook.normalize();
            info!(
                version = playbook.version,
                items = playbook.item_count(),
                "Loaded playbook from {}",
                path.display()
            );
            playbook
        } else {
            let playbook = Playbook::empty(1);
            write_atomic(&path, &playbook)
                .await
                .context("Failed to create playbook document")?;
            info!("Created empty playbook at {}", path.display());
            playbook
        };

        Ok(Self {
            path: Some(path),
            current: Arc::new(Mutex::new(Arc::new(playbook))),
        })
    }

    /// Ephemeral store starting from an empty version-1 playbook
    pub fn in_memory() -> Self {
        Self::with_playbook(Playbook::empty(1))
    }

    /// Ephemeral store seeded with `playbook`
    pub fn with_playbook(mut playbook: Playbook) -> Self {
        playbook.normalize();
        Self {
            path: None,
            current: Arc::new(Mutex::new(Arc::new(playbook))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check, apply and persist under an already-held lock
    ///
    /// Persisting and swapping the in-memory document run on their own task
    /// that owns the lock, so the document on disk and the one served by
    /// `read` never diverge when the caller's future is dropped mid-write.
    async fn commit_locked(
        &self,
        mut current: OwnedMutexGuard<Arc<Playbook>>,
        version_read: u64,
        ops: &[DeltaOperation],
    ) -> Result<CommitResult, StoreError> {
        let version_before = current.version;

        if version_before != version_read {
            debug!(
                expected = version_read,
                actual = version_before,
                "Rejecting commit against stale snapshot"
            );
            return Err(StoreError::Conflict {
                expected: version_read,
                actual: version_before,
            });
        }

        let now = Utc::now();
        let mut next = Playbook::clone(&current);
        let (applied, warnings) = apply_batch(&mut next, ops, now);

        for warning in &warnings {
            warn!(index = warning.index, op = %warning.op, "Skipped delta operation: {}", warning.reason);
        }

        next.version = version_before + 1;
        next.last_updated = now;
        let version_after = next.version;

        let path = self.path.clone();
        let persist = tokio::spawn(async move {
            if let Some(path) = &path {
                write_atomic(path, &next)
                    .await
                    .map_err(|e| StoreError::Persistence(format!("{:#}", e)))?;
            }
            *current = Arc::new(next);
            Ok::<(), StoreError>(())
        });
        persist
            .await
            .map_err(|e| StoreError::Persistence(format!("commit task failed: {}", e)))??;

        info!(
            version_before,
            version_after,
            applied = applied.len(),
            skipped = warnings.len(),
            "Committed playbook delta"
        );

        Ok(CommitResult {
            version_before,
            version_after,
            committed_at: now,
            applied,
            warnings,
        })
    }
}

#[async_trait]
impl PlaybookStore for JsonPlaybookStore {
    async fn read(&self) -> Result<Snapshot, StoreError> {
        let current = self.current.lock().await;
        Ok(Snapshot {
            version: current.version,
            playbook: Arc::clone(&current),
        })
    }

    async fn commit(
        &self,
        version_read: u64,
        ops: &[DeltaOperation],
    ) -> Result<CommitResult, StoreError> {
        let current = Arc::clone(&self.current).lock_owned().await;
        self.commit_locked(current, version_read, ops).await
    }

    async fn commit_within(
        &self,
        version_read: u64,
        ops: &[DeltaOperation],
        wait: Duration,
    ) -> Result<CommitResult, StoreError> {
        let current = tokio::time::timeout(wait, Arc::clone(&self.current).lock_owned())
            .await
            .map_err(|_| StoreError::Busy {
                waited_secs: wait.as_secs(),
            })?;
        self.commit_locked(current, version_read, ops).await
    }
}

/// Write `playbook` next to `path` and rename it into place
async fn write_atomic(path: &Path, playbook: &Playbook) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create playbook directory")?;
    }

    let body = serde_json::to_vec_pretty(playbook).context("Failed to serialize playbook")?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move playbook into {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::{CounterDelta, ItemId, Section};
    use std::future::Future;
    use std::task::Poll;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = JsonPlaybookStore::in_memory();
        let snapshot = store.read().await.unwrap();

        store
            .commit(
                snapshot.version,
                &[DeltaOperation::add(Section::SchemaRules, "rental.inventory_id → inventory.inventory_id")],
            )
            .await
            .unwrap();

        let err = store
            .commit(
                snapshot.version,
                &[DeltaOperation::add(Section::SchemaRules, "film.language_id → language.language_id")],
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict { expected: 1, actual: 2 });
    }

    #[tokio::test]
    async fn test_counter_only_commit_bumps_version() {
        let store = JsonPlaybookStore::in_memory();
        let result = store
            .commit(1, &[DeltaOperation::add(Section::SqlPatterns, "SELECT COUNT(*) FROM film")])
            .await
            .unwrap();
        let id = result.applied[0].id;

        let result = store
            .commit(2, &[DeltaOperation::bump(id, CounterDelta::helpful())])
            .await
            .unwrap();
        assert_eq!(result.version_after, 3);

        let snapshot = store.read().await.unwrap();
        assert_eq!(snapshot.playbook.item_count(), 1);
        assert_eq!(snapshot.playbook.get(id).unwrap().helpful, 1);
    }

    #[tokio::test]
    async fn test_skipped_ops_still_advance_version() {
        let store = JsonPlaybookStore::in_memory();
        let before = store.read().await.unwrap().playbook.last_updated;
        let ghost = ItemId::new(Section::CommonMistakes, 5);
        let result = store
            .commit(1, &[DeltaOperation::bump(ghost, CounterDelta::harmful())])
            .await
            .unwrap();
        assert!(result.changed());
        assert!(result.applied.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.version_after, 2);

        let snapshot = store.read().await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert!(snapshot.playbook.last_updated >= before);
        assert_eq!(snapshot.playbook.item_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_within_gives_up_before_starting() {
        let store = JsonPlaybookStore::in_memory();
        let held = Arc::clone(&store.current).lock_owned().await;

        let err = store
            .commit_within(
                1,
                &[DeltaOperation::add(Section::SqlPatterns, "SELECT 1")],
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Busy { waited_secs: 0 });
        drop(held);

        let snapshot = store.read().await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.playbook.item_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_commit_keeps_disk_and_memory_in_step() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("playbook.json");
        let store = JsonPlaybookStore::open(&path).await.unwrap();

        // Poll the commit once so it starts, then abandon it
        let ops = [DeltaOperation::add(Section::SqlPatterns, "SELECT COUNT(*) FROM rental")];
        {
            let mut commit = Box::pin(store.commit(1, &ops));
            std::future::poll_fn(|cx| {
                let _ = Future::poll(commit.as_mut(), cx);
                Poll::Ready(())
            })
            .await;
        }

        // Reading waits for the in-flight write, after which disk and memory agree
        let in_memory = store.read().await.unwrap();
        let reopened = JsonPlaybookStore::open(&path).await.unwrap();
        let on_disk = reopened.read().await.unwrap();
        assert_eq!(in_memory.version, 2);
        assert_eq!(on_disk.version, in_memory.version);
        assert_eq!(on_disk.playbook.item_count(), in_memory.playbook.item_count());
    }

    #[tokio::test]
    async fn test_reopen_preserves_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("playbook.json");

        let store = JsonPlaybookStore::open(&path).await.unwrap();
        store
            .commit(1, &[DeltaOperation::add(Section::CommonMistakes, "MISTAKE: a → FIX: b")])
            .await
            .unwrap();
        store
            .commit(
                2,
                &[DeltaOperation::Delete {
                    section: Section::CommonMistakes,
                    id: ItemId::new(Section::CommonMistakes, 1),
                }],
            )
            .await
            .unwrap();
        drop(store);

        let reopened = JsonPlaybookStore::open(&path).await.unwrap();
        let snapshot = reopened.read().await.unwrap();
        assert_eq!(snapshot.version, 3);
        assert!(snapshot.playbook.items(Section::CommonMistakes).is_empty());

        let result = reopened
            .commit(3, &[DeltaOperation::add(Section::CommonMistakes, "MISTAKE: c → FIX: d")])
            .await
            .unwrap();
        assert_eq!(result.applied[0].id, ItemId::new(Section::CommonMistakes, 2));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("playbook.json");
        let store = JsonPlaybookStore::open(&path).await.unwrap();

        // Replace the document with a directory so the rename fails
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let err = store
            .commit(1, &[DeltaOperation::add(Section::SqlPatterns, "SELECT 1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));

        let snapshot = store.read().await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.playbook.item_count(), 0);
    }
}
