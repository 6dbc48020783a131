//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the ACE pipeline.
//! All errors implement the `AceErrorExt` trait which provides user-friendly
//! hints and indicates whether a failed run can simply be retried.
//!
//! # Propagation
//!
//! - `Execution` is captured and scored, never aborts a run on its own
//! - `Generation` / `Reflection` abort learning for that run only
//! - `Curation` skips one delta operation, the rest of the batch commits
//! - `Conflict` is retried internally, `Persistence` surfaces once retries are exhausted
//! - `Timeout` fails the run with no playbook mutation

use thiserror::Error;

/// Trait for ACE error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information. All pipeline errors implement this trait.
pub trait AceErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - API keys or tokens
    /// - File paths
    /// - Raw model output
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried by the caller as-is. Non-recoverable
    /// errors need a configuration change or a different request.
    fn is_recoverable(&self) -> bool;
}

/// Errors raised by a `LanguageModel` implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Generation timed out")]
    Timeout,

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Database failure reported by a `SqlExecutor`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ExecutionError(pub String);

/// Failure reported by a `SchemaRetriever`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("retrieval failed: {0}")]
pub struct RetrievalError(pub String);

/// Main pipeline error type
///
/// # Examples
///
/// ```
/// use ace_sdk::errors::{AceError, AceErrorExt};
///
/// let error = AceError::Persistence("conflict retries exhausted".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = AceError::Config("bad log level".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum AceError {
    // Loop errors
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Reflection error: {0}")]
    Reflection(String),

    #[error("Curation error: {0}")]
    Curation(String),

    #[error("Playbook version conflict: read {expected}, store at {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    // Ambient errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AceError {
    /// Short machine-readable tag, used as the error marker in run records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) => "generation_error",
            Self::Execution(_) => "execution_error",
            Self::Reflection(_) => "reflection_error",
            Self::Curation(_) => "curation_error",
            Self::Conflict { .. } => "conflict_error",
            Self::Persistence(_) => "persistence_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Config(_) => "config_error",
            Self::Database(_) => "database_error",
            Self::Model(_) => "model_error",
            Self::Cancelled => "cancelled",
            Self::UnknownRun(_) => "unknown_run",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl AceErrorExt for AceError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Generation(_) => "The model did not produce usable SQL. Try rephrasing the question",
            Self::Execution(_) => "The database rejected the query",
            Self::Reflection(_) => "Could not extract a lesson from this run. The playbook was not changed",
            Self::Curation(_) => "A proposed playbook change was malformed and skipped",
            Self::Conflict { .. } => "The playbook changed concurrently. Retrying",
            Self::Persistence(_) => "The playbook could not be updated. Try again",
            Self::Timeout { .. } => "An external call took too long. Try again",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the database path",
            Self::Model(ModelError::Authentication(_)) => "Model authentication failed. Check your API key",
            Self::Model(ModelError::RateLimited) => "Model rate limit reached. Wait before retrying",
            Self::Model(_) => "Model provider unavailable. Check the endpoint and network",
            Self::Cancelled => "The run was cancelled",
            Self::UnknownRun(_) => "That run is no longer available for feedback. Ask the question again",
            Self::Io(_) => "File system operation failed",
            Self::Internal(_) => "Internal error. Please report this issue",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::Cancelled
            | Self::UnknownRun(_)
            | Self::Internal(_)
            | Self::Model(ModelError::Authentication(_)) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
