//! Keyword schema retriever
//!
//! Ranks a fixed snippet corpus by how many query terms each snippet
//! mentions. Ties keep corpus order. This stands in for a real retrieval
//! index behind the `SchemaRetriever` seam.

use ace_sdk::errors::RetrievalError;
use ace_sdk::{SchemaRetriever, Snippet};
use async_trait::async_trait;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "it", "its", "of", "in", "to", "for", "on", "at",
    "by", "with", "from", "this", "that", "and", "or", "but", "show", "list", "me", "all",
    "which", "what", "how", "many",
];

pub struct KeywordRetriever {
    corpus: Vec<Snippet>,
    limit: usize,
}

impl KeywordRetriever {
    pub fn new(corpus: Vec<Snippet>, limit: usize) -> Self {
        Self { corpus, limit }
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    /// Rank the corpus against `query`, best first
    pub fn rank(&self, query: &str) -> Vec<Snippet> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize, &Snippet)> = self
            .corpus
            .iter()
            .enumerate()
            .filter_map(|(position, snippet)| {
                let hits = terms.intersection(&tokenize(&snippet.content)).count();
                (hits > 0).then_some((hits, position, snippet))
            })
            .collect();

        // More hits first, then corpus order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .take(self.limit)
            .map(|(hits, _, snippet)| Snippet {
                score: hits as f64 / terms.len() as f64,
                ..snippet.clone()
            })
            .collect()
    }
}

#[async_trait]
impl SchemaRetriever for KeywordRetriever {
    async fn search(&self, query: &str) -> Result<Vec<Snippet>, RetrievalError> {
        Ok(self.rank(query))
    }
}

/// Lower-cased alphanumeric terms with stop words removed and a trailing
/// plural `s` dropped, so "films" meets "film"
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .flat_map(|token| token.split('_').chain(std::iter::once(token)))
        .filter(|token| !token.is_empty() && !STOP_WORDS.contains(token))
        .map(|token| {
            if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
                token[..token.len() - 1].to_string()
            } else {
                token.to_string()
            }
        })
        .collect()
}

/// Domain guidance for the DVD-rental sample database
pub fn rental_guidance() -> Vec<Snippet> {
    vec![
        Snippet::new(
            "rule_revenue_calculation",
            "Business Rule: Customer revenue is calculated by summing payment.amount. Use customer → rental → payment JOIN chain.",
        ),
        Snippet::new(
            "rule_film_availability",
            "Business Rule: Film availability requires checking inventory. Use film → inventory → rental to check if a film is currently rented.",
        ),
        Snippet::new(
            "rule_active_customers",
            "Business Rule: Filter customers by active = 1 (1 = active, 0 = inactive) unless explicitly querying inactive customers.",
        ),
        Snippet::new(
            "example_left_join",
            "Example Query: Count rentals per film (including films never rented)\nSQL:\nSELECT f.film_id, f.title, COUNT(r.rental_id) AS rental_count\nFROM film f\nLEFT JOIN inventory i ON f.film_id = i.film_id\nLEFT JOIN rental r ON i.inventory_id = r.inventory_id\nGROUP BY f.film_id, f.title\nORDER BY rental_count DESC;",
        ),
        Snippet::new(
            "example_customer_revenue",
            "Example Query: Show top 10 customers by total revenue\nSQL:\nSELECT c.customer_id, c.first_name || ' ' || c.last_name AS customer_name, SUM(p.amount) AS total_revenue\nFROM customer c\nJOIN payment p ON c.customer_id = p.customer_id\nGROUP BY c.customer_id, c.first_name, c.last_name\nORDER BY total_revenue DESC\nLIMIT 10;",
        ),
    ]
}
