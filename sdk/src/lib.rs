//! ACE SDK
//!
//! Contracts shared between the context-evolution engine and the external
//! collaborators it drives: the generative model, the schema retriever and
//! the SQL executor. Adapters implement these traits; the engine only ever
//! talks to them through this crate.

/// Collaborator traits (model, retriever, executor)
pub mod collaborators;

/// Error types and handling
pub mod errors;

/// Request/response types exchanged with collaborators
pub mod types;

// Re-export commonly used types
pub use collaborators::{LanguageModel, SchemaRetriever, SqlExecutor};
pub use errors::{AceError, AceErrorExt, ExecutionError, ModelError, RetrievalError};
pub use types::{CompletionRole, ExecutionOutcome, Feedback, Prompt, Rows, Snippet};
