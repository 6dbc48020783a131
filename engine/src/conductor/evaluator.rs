//! Evaluator
//!
//! Scores a generation attempt and decides whether it is worth reflecting on.
//! Correctness comes only from explicit feedback or a hard execution failure;
//! an unlabeled success never triggers learning.

use crate::conductor::sql;
use crate::config::EvaluatorConfig;
use ace_sdk::{ExecutionOutcome, Feedback};
use serde::{Deserialize, Serialize};

/// Multi-dimensional quality score of one attempt, each dimension in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub validity: f64,
    pub correctness: f64,
    pub efficiency: f64,
    pub safety: f64,
    /// Mean of the four dimensions
    pub overall: f64,
    pub reflect: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Heuristic Evaluator
pub struct Evaluator {
    neutral_correctness: f64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Evaluator {
    pub fn new(neutral_correctness: f64) -> Self {
        Self {
            neutral_correctness: neutral_correctness.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self::new(config.neutral_correctness)
    }

    pub fn evaluate(
        &self,
        query: &str,
        generated_sql: &str,
        outcome: &ExecutionOutcome,
        feedback: Option<Feedback>,
    ) -> ScoreCard {
        let mut notes = Vec::new();

        match outcome {
            ExecutionOutcome::Succeeded(rows) => {
                notes.push(format!("executed successfully, {} row(s)", rows.row_count))
            }
            ExecutionOutcome::Failed { message } => notes.push(format!("execution failed: {}", message)),
        }

        // Explicit feedback wins over execution status
        let (correctness, reflect) = match (feedback, outcome.is_success()) {
            (Some(Feedback::Incorrect), _) => (0.0, true),
            (Some(Feedback::Correct), _) => (1.0, false),
            (None, false) => (0.0, true),
            (None, true) => (self.neutral_correctness, false),
        };
        if let Some(fb) = feedback {
            notes.push(format!("user feedback: {}", fb));
        }

        let validity = if !outcome.is_success() {
            0.0
        } else if sql::is_read_statement(generated_sql) && sql::balanced_parens(generated_sql) {
            1.0
        } else {
            0.5
        };

        let safety = match sql::destructive_keyword(generated_sql) {
            Some(keyword) => {
                notes.push(format!("destructive keyword {}", keyword));
                0.0
            }
            None => 1.0,
        };

        let mut efficiency: f64 = 1.0;
        if sql::has_unbounded_cross_join(generated_sql) {
            efficiency -= 0.6;
            notes.push("unbounded cross join".to_string());
        }
        if sql::selects_star(generated_sql) {
            efficiency -= 0.2;
            notes.push("SELECT * projection".to_string());
        }
        let efficiency = efficiency.clamp(0.0, 1.0);

        let overall = (validity + correctness + efficiency + safety) / 4.0;

        tracing::debug!(
            query_len = query.len(),
            validity,
            correctness,
            efficiency,
            safety,
            reflect,
            "Scored run"
        );

        ScoreCard {
            validity,
            correctness,
            efficiency,
            safety,
            overall,
            reflect,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_sdk::Rows;

    const GOOD_SQL: &str =
        "SELECT f.title FROM film f JOIN inventory i ON f.film_id = i.film_id";

    fn ok(rows: u64) -> ExecutionOutcome {
        ExecutionOutcome::Succeeded(Rows {
            columns: vec!["title".to_string()],
            rows: Vec::new(),
            row_count: rows,
        })
    }

    fn failed() -> ExecutionOutcome {
        ExecutionOutcome::Failed {
            message: "no such column: f.name".to_string(),
        }
    }

    #[test]
    fn test_incorrect_feedback_forces_reflection() {
        let card = Evaluator::default().evaluate("q", GOOD_SQL, &ok(0), Some(Feedback::Incorrect));
        assert_eq!(card.correctness, 0.0);
        assert!(card.reflect);
        assert_eq!(card.validity, 1.0);
    }

    #[test]
    fn test_correct_feedback_overrides_failure() {
        let card = Evaluator::default().evaluate("q", GOOD_SQL, &failed(), Some(Feedback::Correct));
        assert_eq!(card.correctness, 1.0);
        assert!(!card.reflect);
        assert_eq!(card.validity, 0.0);
    }

    #[test]
    fn test_unlabeled_failure_reflects() {
        let card = Evaluator::default().evaluate("q", GOOD_SQL, &failed(), None);
        assert_eq!(card.correctness, 0.0);
        assert!(card.reflect);
        assert!(card.notes[0].contains("no such column"));
    }

    #[test]
    fn test_unlabeled_success_is_neutral() {
        let card = Evaluator::new(0.7).evaluate("q", GOOD_SQL, &ok(3), None);
        assert_eq!(card.correctness, 0.7);
        assert!(!card.reflect);
        assert_eq!(card.overall, (1.0 + 0.7 + 1.0 + 1.0) / 4.0);
    }

    #[test]
    fn test_heuristics_independent_of_feedback() {
        let sql = "SELECT * FROM film, actor";
        let a = Evaluator::default().evaluate("q", sql, &ok(1), None);
        let b = Evaluator::default().evaluate("q", sql, &ok(1), Some(Feedback::Correct));
        assert!((a.efficiency - 0.2).abs() < 1e-9);
        assert_eq!(a.efficiency, b.efficiency);
        assert_eq!(a.safety, 1.0);

        let unsafe_card = Evaluator::default().evaluate("q", "DELETE FROM film", &ok(0), None);
        assert_eq!(unsafe_card.safety, 0.0);
        assert_eq!(unsafe_card.validity, 0.5);
    }
}
