//! Collaborator request/response types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which pipeline component is asking the model for a completion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CompletionRole {
    /// SQL generation from an assembled context chain
    Generate,

    /// Lesson extraction from a failing run
    Reflect,

    /// Playbook curation (duplicate detection)
    Curate,
}

impl fmt::Display for CompletionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionRole::Generate => write!(f, "generate"),
            CompletionRole::Reflect => write!(f, "reflect"),
            CompletionRole::Curate => write!(f, "curate"),
        }
    }
}

/// A prompt split into system instructions and the user turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// A schema or documentation snippet returned by the retriever
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    /// Stable identifier of the snippet (e.g. `table_film`)
    pub id: String,

    /// Text inserted into the context chain
    pub content: String,

    /// Relevance score assigned by the retriever, higher is better
    #[serde(default)]
    pub score: f64,
}

impl Snippet {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: 0.0,
        }
    }
}

/// Rows returned by a successful statement
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,

    /// At most the executor's fetch limit of rows
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Total number of rows produced, which may exceed `rows.len()`
    pub row_count: u64,
}

impl Rows {
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

/// Result of handing generated SQL to the executor
///
/// A database failure is an outcome, not an error: it is scored by the
/// evaluator and may trigger reflection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded(Rows),
    Failed { message: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded(_))
    }

    pub fn row_count(&self) -> u64 {
        match self {
            ExecutionOutcome::Succeeded(rows) => rows.row_count,
            ExecutionOutcome::Failed { .. } => 0,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Succeeded(_) => None,
            ExecutionOutcome::Failed { message } => Some(message),
        }
    }
}

/// Explicit user judgement of a generated answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Correct,
    Incorrect,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Correct => "correct",
            Feedback::Incorrect => "incorrect",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "correct" | "c" | "yes" | "y" => Ok(Feedback::Correct),
            "incorrect" | "i" | "no" | "n" => Ok(Feedback::Incorrect),
            other => Err(format!("unknown feedback '{}'", other)),
        }
    }
}
