//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - ask: Answer a question, optionally taking feedback
//! - playbook show / teach: Inspect or extend the playbook
//! - history: Show recent runs from episodic memory

use anyhow::{Context, Result};
use serde_json::json;
use std::io::{self, Write};
use std::sync::Arc;

use ace_sdk::Feedback;

use crate::conductor::{Orchestrator, RunResult};
use crate::config::{Config, EpisodicBackend};
use crate::db::Database;
use crate::episodic::{EpisodicLog, JsonlEpisodicLog, RunRecord};
use crate::executor::SqliteSqlExecutor;
use crate::llm::OpenAiCompatModel;
use crate::playbook::{JsonPlaybookStore, PlaybookStore, Section};
use crate::retriever::{rental_guidance, KeywordRetriever};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Open the configured episodic log backend
pub async fn open_episodic_log(config: &Config) -> Result<Arc<dyn EpisodicLog>> {
    let path = &config.storage.episodic_path;
    match config.storage.episodic_backend {
        EpisodicBackend::Sqlite => {
            let database = Database::new(path)
                .await
                .context("Failed to open episodic database")?;
            Ok(Arc::new(database.run_log()))
        }
        EpisodicBackend::Jsonl => Ok(Arc::new(JsonlEpisodicLog::open(path).await?)),
    }
}

/// Wire the bundled adapters into an orchestrator
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let model = Arc::new(OpenAiCompatModel::from_config(&config.llm));

    let executor = SqliteSqlExecutor::open(&config.database.path).await?;
    let mut corpus = executor
        .describe_schema()
        .await
        .context("Failed to describe query database schema")?;
    corpus.extend(rental_guidance());
    tracing::debug!(snippets = corpus.len(), "Retrieval corpus ready");

    let retriever = Arc::new(KeywordRetriever::new(corpus, config.context.max_snippets));
    let store = Arc::new(
        JsonPlaybookStore::open(&config.storage.playbook_path)
            .await
            .context("Failed to open playbook")?,
    );
    let log = open_episodic_log(config).await?;

    Ok(Orchestrator::from_config(
        config,
        model,
        retriever,
        Arc::new(executor),
        store,
        log,
    ))
}

/// Answer a question
///
/// With `interactive`, the result is shown first and the user is asked to
/// judge it; the verdict re-enters the same run at evaluation.
pub async fn handle_ask(
    query: String,
    feedback: Option<Feedback>,
    interactive: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;

    let result = orchestrator.run(&query, feedback).await?;
    print_run(&result, format)?;

    if interactive && result.sql.is_some() && result.error.is_none() {
        if let Some(verdict) = prompt_feedback()? {
            let judged = orchestrator.feedback(&result.run_id, verdict).await?;
            print_run(&judged, format)?;
        }
    }

    Ok(())
}

fn prompt_feedback() -> Result<Option<Feedback>> {
    loop {
        print!("Was this answer correct? [y/n/s(kip)]: ");
        io::stdout().flush()?;

        let mut answer = String::new();
        if io::stdin().read_line(&mut answer)? == 0 {
            return Ok(None);
        }
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(Some(Feedback::Correct)),
            "n" | "no" => return Ok(Some(Feedback::Incorrect)),
            "" | "s" | "skip" => return Ok(None),
            _ => println!("Please answer y, n or s"),
        }
    }
}

fn print_run(result: &RunResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            println!("Run: {}", result.run_id);
            if let Some(sql) = &result.sql {
                println!();
                println!("{}", sql);
            }

            if let Some(summary) = &result.execution_summary {
                println!();
                if summary.success {
                    println!("{} row(s)", summary.row_count);
                    if !summary.columns.is_empty() {
                        println!("  {}", summary.columns.join(" | "));
                    }
                    for row in &summary.preview {
                        let cells: Vec<String> = row.iter().map(display_cell).collect();
                        println!("  {}", cells.join(" | "));
                    }
                } else if let Some(error) = &summary.error {
                    println!("Execution failed: {}", error);
                }
            }

            if let Some(card) = &result.scorecard {
                println!();
                println!(
                    "Score: {:.2} (validity {:.2}, correctness {:.2}, efficiency {:.2}, safety {:.2})",
                    card.overall, card.validity, card.correctness, card.efficiency, card.safety
                );
            }

            if let Some(insight) = &result.insight {
                println!("Lesson [{}]: {}", insight.error_category, insight.key_insight);
            }

            for warning in &result.warnings {
                println!("Warning: {}", warning);
            }

            if let Some(error) = &result.error {
                println!("Error [{}]: {}", error.kind, error.message);
            }

            println!("Playbook version: {}", result.playbook_version_after);
        }
    }
    Ok(())
}

fn display_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Print the playbook
pub async fn handle_playbook_show(config: &Config, format: OutputFormat) -> Result<()> {
    let store = JsonPlaybookStore::open(&config.storage.playbook_path)
        .await
        .context("Failed to open playbook")?;
    let snapshot = store.read().await?;
    let playbook = snapshot.playbook;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(playbook.as_ref())?);
        }
        OutputFormat::Text => {
            println!(
                "Playbook v{} (updated {})",
                playbook.version,
                playbook.last_updated.format("%Y-%m-%d %H:%M:%S")
            );

            for section in Section::ALL {
                let items = playbook.items(section);
                println!();
                println!("{} ({})", section, items.len());
                for item in items {
                    println!(
                        "  [{}] {} (helpful={}, harmful={}, used={})",
                        item.id, item.content, item.helpful, item.harmful, item.usage_count
                    );
                }
            }
        }
    }

    Ok(())
}

/// Add an operator lesson
pub async fn handle_playbook_teach(
    section: Section,
    content: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let result = orchestrator.teach(section, &content).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            for applied in &result.applied {
                println!("{} {}", applied.id, applied.op);
            }
            println!(
                "Playbook v{} -> v{}",
                result.version_before, result.version_after
            );
        }
    }

    Ok(())
}

/// Show recent runs
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let log = open_episodic_log(config).await?;
    let records = log
        .recent(limit)
        .await
        .context("Failed to fetch run history")?;

    match format {
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No runs in history");
                return Ok(());
            }

            println!("Run History (last {} runs):", limit);
            println!();

            for record in &records {
                print_record(record);
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "runs": records,
                "count": records.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_record(record: &RunRecord) {
    println!("Run ID: {}", record.run_id);
    println!("  Query: {}", record.query);
    if let Some(sql) = &record.generated_sql {
        println!("  SQL: {}", sql.replace('\n', " "));
    }
    if let Some(feedback) = record.user_feedback {
        println!("  Feedback: {}", feedback);
    }
    if let Some(insight) = &record.insight {
        println!("  Insight: [{}] {}", insight.error_category, insight.key_insight);
    }
    println!(
        "  Playbook: v{} -> v{} ({} op(s))",
        record.playbook_version_before,
        record.playbook_version_after,
        record.delta_ops_applied.len()
    );
    if let Some(error) = &record.error {
        println!("  Error: [{}] {}", error.kind, error.message);
    }
    println!(
        "  Stages: {}",
        record
            .stages
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    );
    println!("  At: {}", record.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"));
}
