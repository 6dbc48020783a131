//! Integration tests for configuration management
//!
//! These tests load real files from disk and check validation, defaults
//! and path processing.

use ace_engine::config::{Config, EpisodicBackend};
use ace_engine::conductor::ContextSlot;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_full_config_file() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let body = format!(
        r#"
[core]
data_dir = "{data}"
log_level = "debug"

[llm]
base_url = "http://localhost:11434/v1"
model = "qwen2.5-coder:7b"
temperature = 0.1

[context]
budget_tokens = 4000
max_snippets = 3
priority = ["common_mistakes", "schema_rules", "sql_patterns", "retrieved_snippets"]

[evaluator]
neutral_correctness = 0.6

[curator]
penalize_used_items = false
semantic_dedup = true

[orchestrator]
generate_timeout_secs = 20
curate_timeout_secs = 4
max_commit_retries = 5
draft_cache_size = 8

[storage]
playbook_path = "{data}/playbook.json"
episodic_backend = "jsonl"
episodic_path = "{data}/episodic.jsonl"

[database]
path = "{data}/sakila.db"
"#,
        data = data_dir.display()
    );
    let path = write_config(&dir, &body);

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.model, "qwen2.5-coder:7b");
    assert_eq!(config.context.budget_tokens, 4000);
    assert_eq!(config.context.priority[0], ContextSlot::CommonMistakes);
    assert_eq!(config.evaluator.neutral_correctness, 0.6);
    assert!(!config.curator.penalize_used_items);
    assert!(config.curator.semantic_dedup);
    assert_eq!(config.orchestrator.generate_timeout_secs, 20);
    assert_eq!(config.orchestrator.curate_timeout_secs, 4);
    // Unset values keep their defaults
    assert_eq!(config.orchestrator.execute_timeout_secs, 30);
    assert_eq!(config.orchestrator.max_commit_retries, 5);
    assert_eq!(config.storage.episodic_backend, EpisodicBackend::Jsonl);
    assert_eq!(config.database.path, data_dir.join("sakila.db"));

    // Loading creates the data directory
    assert!(data_dir.exists());
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().display().to_string();

    let cases = [
        ("log_level = \"loud\"", ""),
        ("", "[orchestrator]\nmax_commit_retries = 0"),
        ("", "[orchestrator]\ncommit_timeout_secs = 0"),
        ("", "[orchestrator]\ncurate_timeout_secs = 0"),
        ("", "[context]\nbudget_tokens = 0"),
        ("", "[context]\npriority = [\"schema_rules\", \"schema_rules\", \"sql_patterns\", \"common_mistakes\"]"),
        ("", "[evaluator]\nneutral_correctness = 1.5"),
        ("", "[llm]\ntemperature = 3.0"),
    ];

    for (core_extra, section) in cases {
        let body = format!(
            "[core]\ndata_dir = \"{}\"\n{}\n\n{}\n",
            data, core_extra, section
        );
        let path = write_config(&dir, &body);
        let err = Config::load_from_path(&path).unwrap_err();
        assert_eq!(err.kind(), "config_error", "accepted: {}", body);
    }
}

#[test]
fn test_unparseable_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[core\nlog_level = ");
    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = Config::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_written_defaults_load_back() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.data_dir = dir.path().join("data");
    config.storage.playbook_path = dir.path().join("playbook.json");

    let path = write_config(&dir, &toml::to_string_pretty(&config).unwrap());
    let loaded = Config::load_from_path(&path).unwrap();
    assert_eq!(loaded.storage.playbook_path, config.storage.playbook_path);
    assert_eq!(loaded.context.priority, ContextSlot::DEFAULT_PRIORITY.to_vec());
    assert_eq!(loaded.orchestrator.draft_cache_size, 64);
    assert_eq!(loaded.orchestrator.curate_timeout_secs, 30);
}
