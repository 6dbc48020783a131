//! Curator
//!
//! Turns an insight (learning mode) or a confirmed-correct run (reinforcement
//! mode) into delta operations against a playbook snapshot. Lessons are
//! de-duplicated by content fingerprint, so a repeated mistake reinforces the
//! existing item instead of adding a copy. The curator never deletes.

use crate::conductor::reflector::Insight;
use crate::config::CuratorConfig;
use crate::llm::parse_json_reply;
use crate::playbook::{fingerprint, CounterDelta, DeltaOperation, ItemId, Playbook, Section};
use ace_sdk::errors::AceError;
use ace_sdk::{CompletionRole, LanguageModel, Prompt};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Items shown to the model during semantic de-duplication
const SEMANTIC_WINDOW: usize = 10;

const DEFAULT_SEMANTIC_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_FIX: &str = "Review and apply proper pattern";

static SQL_KEYWORD: OnceLock<Regex> = OnceLock::new();

fn sql_keyword() -> &'static Regex {
    SQL_KEYWORD.get_or_init(|| {
        Regex::new(r"(?i)\b(SELECT|WITH|INSERT|UPDATE|DELETE|CREATE)\b")
            .expect("Invalid SQL keyword pattern")
    })
}

/// What to curate
#[derive(Debug, Clone, PartialEq)]
pub enum CurationPlan {
    /// Failing run with an extracted lesson
    Learn { insight: Insight, used: Vec<ItemId> },
    /// Run confirmed correct by the user
    Reinforce { used: Vec<ItemId> },
    /// Operator-supplied lesson
    Teach { section: Section, content: String },
}

/// Delta operations proposed for one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CuratedBatch {
    pub ops: Vec<DeltaOperation>,
    /// Existing item the lesson was recognised as
    pub matched: Option<ItemId>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SimilarityReply {
    #[serde(default)]
    is_similar: bool,
    #[serde(default)]
    similar_to_id: Option<String>,
}

pub struct Curator {
    penalize_used_items: bool,
    semantic_model: Option<Arc<dyn LanguageModel>>,
    semantic_timeout: Duration,
}

impl Default for Curator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Curator {
    pub fn new(penalize_used_items: bool) -> Self {
        Self {
            penalize_used_items,
            semantic_model: None,
            semantic_timeout: DEFAULT_SEMANTIC_TIMEOUT,
        }
    }

    /// Enable model-assisted duplicate detection (role `curate`)
    pub fn with_semantic_dedup(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.semantic_model = Some(model);
        self
    }

    /// Upper bound on one semantic check; expiry counts as "no duplicate"
    pub fn with_semantic_timeout(mut self, limit: Duration) -> Self {
        self.semantic_timeout = limit;
        self
    }

    pub fn from_config(config: &CuratorConfig, model: Arc<dyn LanguageModel>) -> Self {
        let curator = Self::new(config.penalize_used_items);
        if config.semantic_dedup {
            curator.with_semantic_dedup(model)
        } else {
            curator
        }
    }

    /// Propose operations for `plan` against `playbook`
    pub async fn curate(&self, plan: &CurationPlan, playbook: &Playbook) -> CuratedBatch {
        match plan {
            CurationPlan::Learn { insight, used } => self.learn(insight, used, playbook).await,
            CurationPlan::Reinforce { used } => CuratedBatch {
                ops: Self::reinforce(used),
                ..CuratedBatch::default()
            },
            CurationPlan::Teach { section, content } => {
                self.teach(*section, content, playbook).await
            }
        }
    }

    async fn learn(&self, insight: &Insight, used: &[ItemId], playbook: &Playbook) -> CuratedBatch {
        let mut batch = CuratedBatch::default();

        match shape_content(insight.section, &insight.key_insight, &insight.proposed_fix) {
            Ok(content) => {
                let matched = self
                    .find_duplicate(insight.section, &content, playbook, &mut batch.warnings)
                    .await;
                match matched {
                    Some(id) => {
                        tracing::info!(%id, "Lesson matches existing item, reinforcing");
                        let mut delta = CounterDelta {
                            harmful: 1,
                            ..CounterDelta::default()
                        };
                        if used.contains(&id) {
                            delta.usage_count = 1;
                        }
                        batch.ops.push(DeltaOperation::bump(id, delta));
                        batch.matched = Some(id);
                    }
                    None => batch.ops.push(DeltaOperation::add(insight.section, content)),
                }
            }
            Err(e) => {
                tracing::warn!(section = %insight.section, "Skipping lesson: {}", e);
                batch.warnings.push(e.to_string());
            }
        }

        // Items that contributed to the wrong answer; a matched item is counted once
        for id in dedup(used) {
            if Some(id) == batch.matched {
                continue;
            }
            let delta = if self.penalize_used_items {
                CounterDelta::harmful()
            } else {
                CounterDelta::used()
            };
            batch.ops.push(DeltaOperation::bump(id, delta));
        }

        batch
    }

    /// One `helpful += 1` per used item, never an Add or Delete
    pub fn reinforce(used: &[ItemId]) -> Vec<DeltaOperation> {
        dedup(used)
            .into_iter()
            .map(|id| DeltaOperation::bump(id, CounterDelta::helpful()))
            .collect()
    }

    async fn teach(&self, section: Section, content: &str, playbook: &Playbook) -> CuratedBatch {
        let mut batch = CuratedBatch::default();

        let content = match shape_content(section, content, "") {
            Ok(content) => content,
            Err(e) => {
                batch.warnings.push(e.to_string());
                return batch;
            }
        };

        match self
            .find_duplicate(section, &content, playbook, &mut batch.warnings)
            .await
        {
            Some(id) => {
                batch.ops.push(DeltaOperation::bump(id, CounterDelta::used()));
                batch.matched = Some(id);
            }
            None => batch.ops.push(DeltaOperation::add(section, content)),
        }

        batch
    }

    /// Fingerprint match first, then the optional semantic check
    async fn find_duplicate(
        &self,
        section: Section,
        content: &str,
        playbook: &Playbook,
        warnings: &mut Vec<String>,
    ) -> Option<ItemId> {
        if let Some(item) = playbook.find_by_fingerprint(section, &fingerprint(content)) {
            return Some(item.id);
        }

        let model = self.semantic_model.as_ref()?;
        let check = semantic_match(model.as_ref(), section, content, playbook);
        let outcome = match tokio::time::timeout(self.semantic_timeout, check).await {
            Ok(outcome) => outcome,
            Err(_) => Err(format!(
                "timed out after {}s",
                self.semantic_timeout.as_secs_f64()
            )),
        };
        match outcome {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%section, "Semantic duplicate check failed: {}", e);
                warnings.push(format!("semantic duplicate check failed: {}", e));
                None
            }
        }
    }
}

/// Normalize lesson text to the conventions of its section
///
/// `common_mistakes` become `MISTAKE: … → FIX: …`; `sql_patterns` must carry
/// SQL (taken from `proposed_fix` when the lesson itself has none).
pub fn shape_content(section: Section, content: &str, proposed_fix: &str) -> Result<String, AceError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AceError::Curation(format!("empty {} content", section)));
    }

    match section {
        Section::CommonMistakes => {
            let mut shaped = content.replace("->", "→");
            if !shaped.to_uppercase().contains("MISTAKE:") {
                shaped = format!("MISTAKE: {}", shaped);
            }
            if !shaped.contains('→') {
                let fix = proposed_fix.trim();
                let fix = if fix.is_empty() { DEFAULT_FIX } else { fix };
                shaped = format!("{} → FIX: {}", shaped, fix.replace("->", "→"));
            }
            Ok(shaped)
        }
        Section::SqlPatterns => {
            if sql_keyword().is_match(content) {
                Ok(content.to_string())
            } else if sql_keyword().is_match(proposed_fix) {
                Ok(format!("-- {}\n{}", content, proposed_fix.trim()))
            } else {
                Err(AceError::Curation(
                    "sql_patterns entry contains no SQL".to_string(),
                ))
            }
        }
        Section::SchemaRules => Ok(content.to_string()),
    }
}

/// Ask the model whether `content` restates one of the section's recent items
async fn semantic_match(
    model: &dyn LanguageModel,
    section: Section,
    content: &str,
    playbook: &Playbook,
) -> Result<Option<ItemId>, String> {
    let items = playbook.items(section);
    if items.is_empty() {
        return Ok(None);
    }
    let recent = &items[items.len().saturating_sub(SEMANTIC_WINDOW)..];

    let existing = recent
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let preview: String = item.content.chars().take(200).collect();
            format!("{}. [{}] {}", i + 1, item.id, preview)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = Prompt::new(
        "You are a SQL playbook curator. Decide whether a new rule is semantically similar \
         to an existing rule, even if worded differently. Rules are similar when they address \
         the same mistake or pattern. Respond with JSON only.",
        format!(
            "SECTION: {}\n\nNEW RULE:\n{}\n\nEXISTING RULES:\n{}\n\n\
             OUTPUT (JSON):\n{{\"is_similar\": true|false, \"similar_to_id\": \"<id or null>\"}}",
            section, content, existing
        ),
    );

    let reply = model
        .complete(&prompt, CompletionRole::Curate)
        .await
        .map_err(|e| e.to_string())?;
    let parsed: SimilarityReply = parse_json_reply(&reply).map_err(|e| e.to_string())?;

    if !parsed.is_similar {
        return Ok(None);
    }
    let Some(raw_id) = parsed.similar_to_id else {
        return Ok(None);
    };
    let id: ItemId = raw_id.parse()?;
    if recent.iter().any(|item| item.id == id) {
        Ok(Some(id))
    } else {
        Err(format!("model referenced unknown id {}", id))
    }
}

fn dedup(ids: &[ItemId]) -> Vec<ItemId> {
    let mut out: Vec<ItemId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}
