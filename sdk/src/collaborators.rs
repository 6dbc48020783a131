//! Collaborator traits
//!
//! The engine never talks to a model, a retrieval index or a database
//! directly. It goes through these three narrow seams, which lets tests
//! drive the whole loop with deterministic fakes.

use crate::errors::{ExecutionError, ModelError, RetrievalError};
use crate::types::{CompletionRole, Prompt, Rows, Snippet};
use async_trait::async_trait;

/// Text-completion capability used by the generator, reflector and curator
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the name of the backing provider (e.g. "openai")
    fn name(&self) -> &str;

    /// Complete a prompt on behalf of `role`
    ///
    /// # Returns
    /// * `Ok(String)` - Raw completion text
    /// * `Err(ModelError::Timeout)` - The provider did not answer in time
    /// * `Err(ModelError::MalformedOutput)` - The provider answered with nothing usable
    async fn complete(&self, prompt: &Prompt, role: CompletionRole) -> Result<String, ModelError>;
}

/// Schema/documentation retrieval (schema RAG)
#[async_trait]
pub trait SchemaRetriever: Send + Sync {
    /// Snippets relevant to `query`, most relevant first
    async fn search(&self, query: &str) -> Result<Vec<Snippet>, RetrievalError>;
}

/// SQL execution engine
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute `sql`, returning rows or the database's error message
    async fn execute(&self, sql: &str) -> Result<Rows, ExecutionError>;
}
