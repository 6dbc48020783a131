//! Context Builder
//!
//! Packs playbook sections and retrieved schema snippets into a bounded
//! context chain for the generator. Entries are admitted in priority order
//! until the token budget is exhausted, so the lowest-priority slots are the
//! first to be truncated. Pure function of its inputs.

use crate::config::ContextConfig;
use crate::playbook::{ItemId, Playbook, Section};
use ace_sdk::Snippet;
use serde::{Deserialize, Serialize};

/// A region of the context chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSlot {
    SchemaRules,
    SqlPatterns,
    CommonMistakes,
    RetrievedSnippets,
}

impl ContextSlot {
    pub const DEFAULT_PRIORITY: [ContextSlot; 4] = [
        ContextSlot::SchemaRules,
        ContextSlot::SqlPatterns,
        ContextSlot::CommonMistakes,
        ContextSlot::RetrievedSnippets,
    ];

    /// Playbook section backing this slot, if any
    pub fn section(&self) -> Option<Section> {
        match self {
            ContextSlot::SchemaRules => Some(Section::SchemaRules),
            ContextSlot::SqlPatterns => Some(Section::SqlPatterns),
            ContextSlot::CommonMistakes => Some(Section::CommonMistakes),
            ContextSlot::RetrievedSnippets => None,
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            ContextSlot::SchemaRules => "SCHEMA RULES",
            ContextSlot::SqlPatterns => "SQL PATTERNS",
            ContextSlot::CommonMistakes => "COMMON MISTAKES TO AVOID",
            ContextSlot::RetrievedSnippets => "RELEVANT SCHEMA",
        }
    }
}

/// One admitted piece of context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub slot: ContextSlot,
    /// Playbook item id or snippet id
    pub id: String,
    pub content: String,
}

impl ContextEntry {
    fn line(&self) -> String {
        format!("[{}] {}\n", self.id, self.content)
    }
}

/// The assembled, budget-bounded context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChain {
    pub query: String,
    /// Admitted entries in priority order
    pub entries: Vec<ContextEntry>,
    /// Candidates left out for lack of budget
    pub truncated: usize,
    pub budget_tokens: usize,
}

impl ContextChain {
    /// Ids of playbook items present in the chain
    pub fn playbook_ids(&self) -> Vec<ItemId> {
        self.entries
            .iter()
            .filter(|entry| entry.slot.section().is_some())
            .filter_map(|entry| entry.id.parse().ok())
            .collect()
    }

    pub fn contains_item(&self, id: ItemId) -> bool {
        let rendered = id.to_string();
        self.entries
            .iter()
            .any(|entry| entry.slot.section().is_some() && entry.id == rendered)
    }

    /// Approximate size of the rendered chain
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.query)
            + self
                .entries
                .iter()
                .map(|entry| estimate_tokens(&entry.line()))
                .sum::<usize>()
    }

    /// Render as prompt text, one heading per non-empty slot
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current: Option<ContextSlot> = None;

        for entry in &self.entries {
            if current != Some(entry.slot) {
                if current.is_some() {
                    out.push('\n');
                }
                out.push_str(&format!("### {}\n", entry.slot.heading()));
                current = Some(entry.slot);
            }
            out.push_str(&entry.line());
        }

        out
    }
}

/// Rough token estimate used throughout budgeting (4 characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub struct ContextBuilder {
    budget_tokens: usize,
    max_snippets: usize,
    priority: Vec<ContextSlot>,
}

impl ContextBuilder {
    pub fn new(budget_tokens: usize) -> Self {
        Self {
            budget_tokens,
            max_snippets: 5,
            priority: ContextSlot::DEFAULT_PRIORITY.to_vec(),
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            budget_tokens: config.budget_tokens,
            max_snippets: config.max_snippets,
            priority: config.priority.clone(),
        }
    }

    pub fn with_priority(mut self, priority: Vec<ContextSlot>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_snippets(mut self, max_snippets: usize) -> Self {
        self.max_snippets = max_snippets;
        self
    }

    /// Assemble the context chain for `query`
    pub fn build(&self, query: &str, snippets: &[Snippet], playbook: &Playbook) -> ContextChain {
        let mut remaining = self.budget_tokens.saturating_sub(estimate_tokens(query));
        let mut entries = Vec::new();
        let mut truncated = 0;
        let mut exhausted = false;

        for slot in &self.priority {
            for candidate in self.candidates(*slot, snippets, playbook) {
                if exhausted {
                    truncated += 1;
                    continue;
                }
                let cost = estimate_tokens(&candidate.line());
                if cost > remaining {
                    // Everything after this point has lower or equal priority
                    exhausted = true;
                    truncated += 1;
                    continue;
                }
                remaining -= cost;
                entries.push(candidate);
            }
        }

        if truncated > 0 {
            tracing::debug!(
                admitted = entries.len(),
                truncated,
                budget = self.budget_tokens,
                "Context budget exhausted"
            );
        }

        ContextChain {
            query: query.to_string(),
            entries,
            truncated,
            budget_tokens: self.budget_tokens,
        }
    }

    fn candidates(
        &self,
        slot: ContextSlot,
        snippets: &[Snippet],
        playbook: &Playbook,
    ) -> Vec<ContextEntry> {
        match slot.section() {
            Some(section) => playbook
                .items(section)
                .iter()
                .map(|item| ContextEntry {
                    slot,
                    id: item.id.to_string(),
                    content: item.content.clone(),
                })
                .collect(),
            None => snippets
                .iter()
                .take(self.max_snippets)
                .map(|snippet| ContextEntry {
                    slot,
                    id: snippet.id.clone(),
                    content: snippet.content.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::PlaybookItem;
    use chrono::Utc;

    fn playbook_with(items: &[(Section, &str)]) -> Playbook {
        let mut playbook = Playbook::empty(1);
        let now = Utc::now();
        for (section, content) in items {
            let id = playbook.issue_id(*section);
            playbook
                .sections
                .entry(*section)
                .or_default()
                .push(PlaybookItem {
                    id,
                    content: content.to_string(),
                    usage_count: 0,
                    helpful: 0,
                    harmful: 0,
                    created_at: now,
                    updated_at: now,
                });
        }
        playbook
    }

    fn sample_playbook() -> Playbook {
        playbook_with(&[
            (Section::SchemaRules, "rental links to film through inventory"),
            (Section::SqlPatterns, "SELECT f.title FROM film f LEFT JOIN inventory i ON ..."),
            (Section::CommonMistakes, "MISTAKE: INNER JOIN for absence → FIX: LEFT JOIN ... IS NULL"),
        ])
    }

    fn snippets() -> Vec<Snippet> {
        vec![
            Snippet::new("table_film", "film(film_id, title, release_year)"),
            Snippet::new("table_rental", "rental(rental_id, inventory_id, customer_id)"),
        ]
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = ContextBuilder::new(8000);
        let playbook = sample_playbook();
        let a = builder.build("films never rented", &snippets(), &playbook);
        let b = builder.build("films never rented", &snippets(), &playbook);
        assert_eq!(a, b);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn test_render_groups_entries_under_headings() {
        let builder = ContextBuilder::new(8000);
        let rendered = builder
            .build("films never rented", &snippets(), &sample_playbook())
            .render();

        let headings: Vec<&str> = rendered.lines().filter(|l| l.starts_with("### ")).collect();
        assert_eq!(
            headings,
            vec![
                "### SCHEMA RULES",
                "### SQL PATTERNS",
                "### COMMON MISTAKES TO AVOID",
                "### RELEVANT SCHEMA",
            ]
        );
        assert!(rendered.starts_with("### SCHEMA RULES\n["));
        assert!(rendered.contains("\n\n### RELEVANT SCHEMA\n[table_film] film(film_id"));
        assert!(rendered.ends_with("rental(rental_id, inventory_id, customer_id)\n"));
    }

    #[test]
    fn test_priority_order_and_ids() {
        let builder = ContextBuilder::new(8000);
        let chain = builder.build("films never rented", &snippets(), &sample_playbook());

        let slots: Vec<ContextSlot> = chain.entries.iter().map(|e| e.slot).collect();
        assert_eq!(
            slots,
            vec![
                ContextSlot::SchemaRules,
                ContextSlot::SqlPatterns,
                ContextSlot::CommonMistakes,
                ContextSlot::RetrievedSnippets,
                ContextSlot::RetrievedSnippets,
            ]
        );
        assert_eq!(chain.playbook_ids().len(), 3);
        assert!(chain.contains_item("ts-00001".parse().unwrap()));
        assert_eq!(chain.truncated, 0);

        let rendered = chain.render();
        assert!(rendered.find("SCHEMA RULES").unwrap() < rendered.find("RELEVANT SCHEMA").unwrap());
        assert!(rendered.contains("[table_film]"));
    }

    #[test]
    fn test_lowest_priority_truncated_first() {
        let playbook = sample_playbook();
        let full = ContextBuilder::new(8000).build("q", &snippets(), &playbook);
        let playbook_only: usize = full
            .entries
            .iter()
            .filter(|e| e.slot != ContextSlot::RetrievedSnippets)
            .map(|e| estimate_tokens(&e.line()))
            .sum();

        // Room for the query and the playbook, not for any snippet
        let budget = estimate_tokens("q") + playbook_only + 1;
        let chain = ContextBuilder::new(budget).build("q", &snippets(), &playbook);

        assert_eq!(chain.truncated, 2);
        assert!(chain
            .entries
            .iter()
            .all(|e| e.slot != ContextSlot::RetrievedSnippets));
        assert!(chain.estimated_tokens() <= budget);
    }

    #[test]
    fn test_configurable_priority() {
        let builder = ContextBuilder::new(8000).with_priority(vec![
            ContextSlot::RetrievedSnippets,
            ContextSlot::CommonMistakes,
            ContextSlot::SqlPatterns,
            ContextSlot::SchemaRules,
        ]);
        let chain = builder.build("q", &snippets(), &sample_playbook());
        assert_eq!(chain.entries[0].slot, ContextSlot::RetrievedSnippets);
        assert_eq!(chain.entries.last().unwrap().slot, ContextSlot::SchemaRules);
    }

    #[test]
    fn test_snippet_cap() {
        let builder = ContextBuilder::new(8000).with_max_snippets(1);
        let chain = builder.build("q", &snippets(), &Playbook::empty(1));
        assert_eq!(chain.entries.len(), 1);
        assert_eq!(chain.entries[0].id, "table_film");
    }
}
