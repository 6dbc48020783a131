//! SQL Generator
//!
//! Turns a context chain into SQL through the language model (role
//! `generate`). The reply is expected as JSON; a bare ```sql fence is
//! accepted as a fallback. Unsafe statements are rejected here so they never
//! reach the executor.

use crate::conductor::context::ContextChain;
use crate::conductor::sql;
use crate::llm::{extract_sql_fence, parse_json_reply};
use crate::playbook::ItemId;
use ace_sdk::errors::{AceError, ModelError};
use ace_sdk::{CompletionRole, LanguageModel, Prompt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an expert SQL generator for a relational database.\n\
Use the schema and the curated playbook below. Playbook rules are absolute: when a \
user request would repeat a listed MISTAKE, follow its FIX instead.\n\
CONSTRAINTS:\n\
- Read-only queries only (SELECT / WITH)\n\
- Always use explicit JOIN conditions\n\
- Include table aliases for clarity\n\
- Return JSON only: {\"reasoning\": \"...\", \"sql\": \"...\", \"playbook_ids_used\": [...], \"tables_accessed\": [...]}";

/// A generation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub reasoning: String,
    pub sql: String,
    /// Playbook items the model reports relying on, restricted to those in the context
    pub playbook_ids_used: Vec<ItemId>,
    pub tables_accessed: Vec<String>,
}

/// Intermediate deserialization type for model JSON output
#[derive(Debug, Deserialize)]
struct RawGeneration {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    sql: String,
    #[serde(default)]
    playbook_ids_used: Vec<String>,
    #[serde(default)]
    tables_accessed: Vec<String>,
}

pub struct Generator {
    model: Arc<dyn LanguageModel>,
}

impl Generator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn prompt(chain: &ContextChain) -> Prompt {
        let user = format!(
            "{}\nUSER QUERY: {}\n\nOUTPUT (JSON):",
            chain.render(),
            chain.query
        );
        Prompt::new(SYSTEM_PROMPT, user)
    }

    /// Generate SQL for the chain's query
    ///
    /// Model transport failures surface as `AceError::Model`; unusable or
    /// unsafe output as `AceError::Generation`.
    pub async fn generate(&self, chain: &ContextChain) -> Result<Generation, AceError> {
        let reply = self
            .model
            .complete(&Self::prompt(chain), CompletionRole::Generate)
            .await
            .map_err(|e| match e {
                ModelError::MalformedOutput(msg) => AceError::Generation(msg),
                other => AceError::Model(other),
            })?;

        let generation = Self::parse_reply(&reply, chain)?;

        if let Some(keyword) = sql::destructive_keyword(&generation.sql) {
            tracing::warn!(%keyword, "Rejected destructive SQL from generator");
            return Err(AceError::Generation(format!(
                "refusing to execute {} statement",
                keyword
            )));
        }

        Ok(generation)
    }

    fn parse_reply(reply: &str, chain: &ContextChain) -> Result<Generation, AceError> {
        let raw = match parse_json_reply::<RawGeneration>(reply) {
            Ok(raw) => raw,
            Err(_) => match extract_sql_fence(reply) {
                Some(fenced) => RawGeneration {
                    reasoning: String::new(),
                    sql: fenced.to_string(),
                    playbook_ids_used: Vec::new(),
                    tables_accessed: Vec::new(),
                },
                None => {
                    return Err(AceError::Generation(
                        "model reply contained neither JSON nor a SQL block".to_string(),
                    ))
                }
            },
        };

        let sql = raw.sql.trim().trim_end_matches(';').trim().to_string();
        if sql.is_empty() {
            return Err(AceError::Generation("model returned empty SQL".to_string()));
        }

        let mut playbook_ids_used: Vec<ItemId> = Vec::new();
        for raw_id in &raw.playbook_ids_used {
            match raw_id.parse::<ItemId>() {
                Ok(id) if chain.contains_item(id) => {
                    if !playbook_ids_used.contains(&id) {
                        playbook_ids_used.push(id);
                    }
                }
                _ => tracing::debug!(id = %raw_id, "Ignoring playbook id not present in context"),
            }
        }

        let tables_accessed = if raw.tables_accessed.is_empty() {
            sql::referenced_tables(&sql)
        } else {
            raw.tables_accessed
        };

        Ok(Generation {
            reasoning: raw.reasoning,
            sql,
            playbook_ids_used,
            tables_accessed,
        })
    }
}
