//! Reflector
//!
//! Converts a failing run into a structured `Insight` via the language model
//! (role `reflect`). Model failures surface as `AceError::Reflection`; the
//! caller records the run without an insight and leaves the playbook alone.

use crate::llm::parse_json_reply;
use crate::playbook::{PlaybookItem, Section};
use ace_sdk::errors::AceError;
use ace_sdk::{CompletionRole, ExecutionOutcome, Feedback, LanguageModel, Prompt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a SQL analysis expert. Analyze a failed SQL generation \
attempt and extract one reusable lesson.\n\
Your tasks:\n\
1. Identify what went wrong\n\
2. Diagnose the root cause\n\
3. State the correct approach\n\
4. Write one key insight usable verbatim as a playbook rule\n\
Respond with JSON only.";

/// Closed taxonomy of generation mistakes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    JoinError,
    AggregationError,
    SchemaMisunderstanding,
    DateHandlingError,
    BusinessLogicError,
    SyntaxError,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::JoinError => "join_error",
            ErrorCategory::AggregationError => "aggregation_error",
            ErrorCategory::SchemaMisunderstanding => "schema_misunderstanding",
            ErrorCategory::DateHandlingError => "date_handling_error",
            ErrorCategory::BusinessLogicError => "business_logic_error",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::Other => "other",
        }
    }

    /// Map a model-supplied label onto the taxonomy; anything unknown is `Other`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "join_error" | "join" => ErrorCategory::JoinError,
            "aggregation_error" | "aggregation" => ErrorCategory::AggregationError,
            "schema_misunderstanding" | "schema_error" | "schema" => {
                ErrorCategory::SchemaMisunderstanding
            }
            "date_handling_error" | "date_handling" | "date_error" => {
                ErrorCategory::DateHandlingError
            }
            "business_logic_error" | "logic_error" | "business_logic" => {
                ErrorCategory::BusinessLogicError
            }
            "syntax_error" | "syntax" => ErrorCategory::SyntaxError,
            _ => ErrorCategory::Other,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lesson extracted from one failing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub error_category: ErrorCategory,
    pub root_cause: String,
    /// Usable verbatim as playbook content
    pub key_insight: String,
    pub proposed_fix: String,
    /// Playbook section the lesson belongs to
    pub section: Section,
}

/// Everything the reflector sees about a run
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInput<'a> {
    pub query: &'a str,
    pub sql: &'a str,
    pub outcome: &'a ExecutionOutcome,
    pub feedback: Option<Feedback>,
    pub used_items: &'a [PlaybookItem],
}

/// `key_insight` arrives either as a string or as `{type, content}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeyInsight {
    Text(String),
    Typed {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        content: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawInsight {
    #[serde(default)]
    error_category: Option<String>,
    #[serde(default)]
    root_cause: String,
    key_insight: Option<RawKeyInsight>,
    #[serde(default, alias = "correct_sql")]
    proposed_fix: String,
    #[serde(default)]
    section: Option<String>,
}

pub struct Reflector {
    model: Arc<dyn LanguageModel>,
}

impl Reflector {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn prompt(input: &ReflectionInput<'_>) -> Prompt {
        let status = match input.outcome {
            ExecutionOutcome::Succeeded(_) => "SUCCESS".to_string(),
            ExecutionOutcome::Failed { message } => format!("FAILED\nERROR: {}", message),
        };

        let used = if input.used_items.is_empty() {
            "(none)".to_string()
        } else {
            input
                .used_items
                .iter()
                .map(|item| format!("[{}] {}", item.id, item.content))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let user = format!(
            "USER QUERY: {query}\n\n\
             GENERATED SQL:\n{sql}\n\n\
             EXECUTION STATUS: {status}\n\
             ROWS RETURNED: {rows}\n\n\
             USER FEEDBACK: {feedback}\n\n\
             PLAYBOOK ITEMS USED:\n{used}\n\n\
             OUTPUT (JSON):\n\
             {{\n\
             \x20 \"error_category\": \"join_error|aggregation_error|schema_misunderstanding|date_handling_error|business_logic_error|syntax_error|other\",\n\
             \x20 \"root_cause\": \"...\",\n\
             \x20 \"key_insight\": \"MISTAKE: <wrong approach> → FIX: <correct approach>\",\n\
             \x20 \"proposed_fix\": \"<corrected SQL or approach>\",\n\
             \x20 \"section\": \"common_mistakes|sql_patterns|schema_rules\"\n\
             }}",
            query = input.query,
            sql = input.sql,
            status = status,
            rows = input.outcome.row_count(),
            feedback = input.feedback.map(|f| f.as_str()).unwrap_or("none"),
            used = used,
        );

        Prompt::new(SYSTEM_PROMPT, user)
    }

    pub async fn reflect(&self, input: &ReflectionInput<'_>) -> Result<Insight, AceError> {
        let reply = self
            .model
            .complete(&Self::prompt(input), CompletionRole::Reflect)
            .await
            .map_err(|e| AceError::Reflection(e.to_string()))?;

        let insight = Self::parse_reply(&reply)?;
        tracing::info!(
            category = %insight.error_category,
            section = %insight.section,
            "Extracted insight"
        );
        Ok(insight)
    }

    fn parse_reply(reply: &str) -> Result<Insight, AceError> {
        let raw: RawInsight =
            parse_json_reply(reply).map_err(|e| AceError::Reflection(e.to_string()))?;

        let (key_insight, typed_section) = match raw.key_insight {
            Some(RawKeyInsight::Text(text)) => (text, None),
            Some(RawKeyInsight::Typed { kind, content }) => (content, kind),
            None => (String::new(), None),
        };
        let key_insight = key_insight.trim().to_string();
        if key_insight.is_empty() {
            return Err(AceError::Reflection(
                "Malformed model output: empty key_insight".to_string(),
            ));
        }

        let section = raw
            .section
            .or(typed_section)
            .and_then(|s| s.parse::<Section>().ok())
            .unwrap_or(Section::CommonMistakes);

        Ok(Insight {
            error_category: raw
                .error_category
                .as_deref()
                .map(ErrorCategory::from_label)
                .unwrap_or(ErrorCategory::Other),
            root_cause: raw.root_cause.trim().to_string(),
            key_insight,
            proposed_fix: raw.proposed_fix.trim().to_string(),
            section,
        })
    }
}
