//! Deterministic collaborators for driving the loop in tests

#![allow(dead_code)]

use ace_sdk::errors::{ExecutionError, ModelError, RetrievalError};
use ace_sdk::{CompletionRole, LanguageModel, Prompt, Rows, SchemaRetriever, Snippet, SqlExecutor};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Model that answers each role from its own queue of scripted replies
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<CompletionRole, VecDeque<Result<String, ModelError>>>>,
    delays: HashMap<CompletionRole, Duration>,
    calls: Mutex<Vec<(CompletionRole, Prompt)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, role: CompletionRole, text: impl Into<String>) -> Self {
        self.push(role, Ok(text.into()));
        self
    }

    pub fn fail(self, role: CompletionRole, error: ModelError) -> Self {
        self.push(role, Err(error));
        self
    }

    pub fn with_delay(mut self, role: CompletionRole, delay: Duration) -> Self {
        self.delays.insert(role, delay);
        self
    }

    fn push(&self, role: CompletionRole, reply: Result<String, ModelError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, role: CompletionRole) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }

    pub fn prompts(&self, role: CompletionRole) -> Vec<Prompt> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt, role: CompletionRole) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push((role, prompt.clone()));
        if let Some(delay) = self.delays.get(&role) {
            tokio::time::sleep(*delay).await;
        }
        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Err(ModelError::MalformedOutput(format!("no scripted {} reply", role))))
    }
}

/// Retriever returning a fixed list, or failing
pub struct StaticRetriever {
    snippets: Option<Vec<Snippet>>,
}

impl StaticRetriever {
    pub fn new(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets: Some(snippets),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing() -> Self {
        Self { snippets: None }
    }
}

#[async_trait]
impl SchemaRetriever for StaticRetriever {
    async fn search(&self, _query: &str) -> Result<Vec<Snippet>, RetrievalError> {
        self.snippets
            .clone()
            .ok_or_else(|| RetrievalError("index offline".to_string()))
    }
}

/// Executor that answers every statement the same way
pub struct FixedExecutor {
    result: Result<Rows, ExecutionError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FixedExecutor {
    pub fn rows(rows: Rows) -> Self {
        Self {
            result: Ok(rows),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Success with zero rows
    pub fn empty() -> Self {
        Self::rows(Rows {
            columns: vec!["title".to_string()],
            rows: Vec::new(),
            row_count: 0,
        })
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(ExecutionError(message.to_string())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for FixedExecutor {
    async fn execute(&self, _sql: &str) -> Result<Rows, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

pub const INNER_JOIN_SQL: &str = "SELECT f.title FROM film f \
     JOIN inventory i ON f.film_id = i.film_id \
     JOIN rental r ON i.inventory_id = r.inventory_id \
     WHERE r.rental_id IS NULL";

pub fn generation_reply(sql: &str, used: &[&str]) -> String {
    json!({
        "reasoning": "Films joined to their rentals",
        "sql": sql,
        "playbook_ids_used": used,
        "tables_accessed": ["film", "inventory", "rental"]
    })
    .to_string()
}

pub fn join_error_reply() -> String {
    reflection_reply(
        "join_error",
        "Using INNER JOIN between film and rental to find films never rented -> use LEFT JOIN inventory and rental, then filter rental_id IS NULL",
    )
}

pub fn reflection_reply(category: &str, key_insight: &str) -> String {
    json!({
        "error_category": category,
        "root_cause": "INNER JOIN discards films without rentals",
        "key_insight": key_insight,
        "proposed_fix": "SELECT f.title FROM film f LEFT JOIN inventory i ON f.film_id = i.film_id LEFT JOIN rental r ON i.inventory_id = r.inventory_id WHERE r.rental_id IS NULL",
        "section": "common_mistakes"
    })
    .to_string()
}
