//! Delta operations
//!
//! Structural mutations of the playbook. A batch is applied in order; an
//! operation that is malformed or targets an unknown id is skipped with a
//! recorded warning and never aborts the rest of the batch.

use super::{ItemId, Playbook, PlaybookItem, Section};
use ace_sdk::errors::AceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counter increments carried by an `Update`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    #[serde(default)]
    pub helpful: u64,
    #[serde(default)]
    pub harmful: u64,
    #[serde(default)]
    pub usage_count: u64,
}

impl CounterDelta {
    /// `helpful += 1` and nothing else
    pub fn helpful() -> Self {
        Self {
            helpful: 1,
            ..Self::default()
        }
    }

    pub fn harmful() -> Self {
        Self {
            harmful: 1,
            usage_count: 1,
            ..Self::default()
        }
    }

    pub fn used() -> Self {
        Self {
            usage_count: 1,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.helpful == 0 && self.harmful == 0 && self.usage_count == 0
    }
}

/// What an `Update` changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemChange {
    Content(String),
    Counters(CounterDelta),
}

/// A single structural mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOperation {
    Add {
        section: Section,
        content: String,
    },
    Update {
        section: Section,
        id: ItemId,
        change: ItemChange,
    },
    Delete {
        section: Section,
        id: ItemId,
    },
}

impl DeltaOperation {
    pub fn add(section: Section, content: impl Into<String>) -> Self {
        DeltaOperation::Add {
            section,
            content: content.into(),
        }
    }

    pub fn bump(id: ItemId, delta: CounterDelta) -> Self {
        DeltaOperation::Update {
            section: id.section,
            id,
            change: ItemChange::Counters(delta),
        }
    }

    pub fn section(&self) -> Section {
        match self {
            DeltaOperation::Add { section, .. }
            | DeltaOperation::Update { section, .. }
            | DeltaOperation::Delete { section, .. } => *section,
        }
    }

    /// Shape check at the store boundary
    pub fn validate(&self) -> Result<(), AceError> {
        match self {
            DeltaOperation::Add { content, .. } if content.trim().is_empty() => {
                Err(AceError::Curation("add with empty content".to_string()))
            }
            DeltaOperation::Update { section, id, change } => {
                check_id_section(*section, *id)?;
                match change {
                    ItemChange::Content(content) if content.trim().is_empty() => Err(
                        AceError::Curation(format!("update of {} with empty content", id)),
                    ),
                    ItemChange::Counters(delta) if delta.is_zero() => Err(AceError::Curation(
                        format!("update of {} with zero counter delta", id),
                    )),
                    _ => Ok(()),
                }
            }
            DeltaOperation::Delete { section, id } => check_id_section(*section, *id),
            _ => Ok(()),
        }
    }
}

fn check_id_section(section: Section, id: ItemId) -> Result<(), AceError> {
    if id.section != section {
        return Err(AceError::Curation(format!(
            "id {} does not belong to section {}",
            id, section
        )));
    }
    Ok(())
}

impl fmt::Display for DeltaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaOperation::Add { section, .. } => write!(f, "add({})", section),
            DeltaOperation::Update { id, change, .. } => match change {
                ItemChange::Content(_) => write!(f, "update({}, content)", id),
                ItemChange::Counters(d) => write!(
                    f,
                    "update({}, helpful+{}, harmful+{}, usage+{})",
                    id, d.helpful, d.harmful, d.usage_count
                ),
            },
            DeltaOperation::Delete { id, .. } => write!(f, "delete({})", id),
        }
    }
}

/// An operation that took effect, with the id it touched (assigned, for `Add`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOp {
    pub id: ItemId,
    pub op: DeltaOperation,
}

/// A skipped operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitWarning {
    /// Position of the operation in its batch
    pub index: usize,
    pub op: String,
    pub reason: String,
}

impl CommitWarning {
    pub fn new(index: usize, op: &DeltaOperation, reason: impl Into<String>) -> Self {
        Self {
            index,
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}

/// Apply `ops` in order to `playbook`
///
/// Does not touch `version` / `last_updated`; the store owns those.
pub(crate) fn apply_batch(
    playbook: &mut Playbook,
    ops: &[DeltaOperation],
    now: DateTime<Utc>,
) -> (Vec<AppliedOp>, Vec<CommitWarning>) {
    let mut applied = Vec::with_capacity(ops.len());
    let mut warnings = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        if let Err(e) = op.validate() {
            warnings.push(CommitWarning::new(index, op, e.to_string()));
            continue;
        }

        match op {
            DeltaOperation::Add { section, content } => {
                let id = playbook.issue_id(*section);
                playbook.sections.entry(*section).or_default().push(PlaybookItem {
                    id,
                    content: content.trim().to_string(),
                    usage_count: 0,
                    helpful: 0,
                    harmful: 0,
                    created_at: now,
                    updated_at: now,
                });
                applied.push(AppliedOp { id, op: op.clone() });
            }
            DeltaOperation::Update { section, id, change } => {
                let item = playbook
                    .sections
                    .get_mut(section)
                    .and_then(|items| items.iter_mut().find(|item| item.id == *id));
                let Some(item) = item else {
                    warnings.push(CommitWarning::new(index, op, format!("unknown id {}", id)));
                    continue;
                };
                match change {
                    ItemChange::Content(content) => item.content = content.trim().to_string(),
                    ItemChange::Counters(delta) => {
                        item.helpful += delta.helpful;
                        item.harmful += delta.harmful;
                        item.usage_count += delta.usage_count;
                    }
                }
                item.updated_at = now;
                applied.push(AppliedOp { id: *id, op: op.clone() });
            }
            DeltaOperation::Delete { section, id } => {
                let items = playbook.sections.entry(*section).or_default();
                let before = items.len();
                items.retain(|item| item.id != *id);
                if items.len() == before {
                    warnings.push(CommitWarning::new(index, op, format!("unknown id {}", id)));
                    continue;
                }
                applied.push(AppliedOp { id: *id, op: op.clone() });
            }
        }
    }

    (applied, warnings)
}
