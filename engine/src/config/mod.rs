//! Configuration management
//!
//! This module handles loading, validation, and management of the ACE configuration.
//! Configuration is stored in TOML format at ~/.ace/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **llm**: OpenAI-compatible endpoint used for all three completion roles
//! - **context**: Token budget and section priority for the context chain
//! - **evaluator**: Scoring defaults
//! - **curator**: Learning policy switches
//! - **orchestrator**: Per-stage timeouts, commit retries, feedback cache size
//! - **storage**: Playbook document and episodic log locations
//! - **database**: SQLite database the bundled executor runs against
//!
//! Every section except `core` may be omitted and falls back to defaults.
//!
//! # Path Expansion
//!
//! All configured paths expand a leading `~` to the user's home directory.
//!
//! # Examples
//!
//! ```no_run
//! use ace_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Playbook: {:?}", config.storage.playbook_path);
//! println!("Commit retries: {}", config.orchestrator.max_commit_retries);
//! # Ok(())
//! # }
//! ```

use crate::conductor::context::ContextSlot;
use ace_sdk::errors::AceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub curator: CuratorConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Language model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    /// Local servers usually need none.
    #[serde(
        default = "default_api_key_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub temperature: f32,
}

/// Context chain assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Budget in approximate tokens (4 characters per token)
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,

    /// Retrieved snippets considered per query
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,

    /// Highest priority first; lowest priority is truncated first
    #[serde(default = "default_priority")]
    pub priority: Vec<ContextSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Correctness assigned to a successful run with no user feedback
    #[serde(default = "default_neutral_correctness")]
    pub neutral_correctness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    /// Count a failure against every playbook item used in the failing run
    #[serde(default = "default_true")]
    pub penalize_used_items: bool,

    /// Ask the model whether a new lesson duplicates a recent item
    #[serde(default)]
    pub semantic_dedup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,

    #[serde(default = "default_execute_timeout")]
    pub execute_timeout_secs: u64,

    #[serde(default = "default_reflect_timeout")]
    pub reflect_timeout_secs: u64,

    /// Budget for the semantic duplicate check; expiry falls back to adding the lesson
    #[serde(default = "default_curate_timeout")]
    pub curate_timeout_secs: u64,

    #[serde(default = "default_commit_timeout")]
    pub commit_timeout_secs: u64,

    /// Conflict retries after the first commit attempt (1-10)
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,

    /// Runs kept for later feedback
    #[serde(default = "default_draft_cache_size")]
    pub draft_cache_size: usize,
}

impl OrchestratorConfig {
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }

    pub fn reflect_timeout(&self) -> Duration {
        Duration::from_secs(self.reflect_timeout_secs)
    }

    pub fn curate_timeout(&self) -> Duration {
        Duration::from_secs(self.curate_timeout_secs)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }
}

/// Episodic log storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodicBackend {
    Sqlite,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_playbook_path")]
    pub playbook_path: PathBuf,

    #[serde(default = "default_episodic_backend")]
    pub episodic_backend: EpisodicBackend,

    #[serde(default = "default_episodic_path")]
    pub episodic_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database queried by generated SQL
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.ace")
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_budget_tokens() -> usize {
    8000
}

fn default_max_snippets() -> usize {
    5
}

fn default_priority() -> Vec<ContextSlot> {
    ContextSlot::DEFAULT_PRIORITY.to_vec()
}

fn default_neutral_correctness() -> f64 {
    0.5
}

fn default_generate_timeout() -> u64 {
    60
}

fn default_execute_timeout() -> u64 {
    30
}

fn default_reflect_timeout() -> u64 {
    60
}

fn default_curate_timeout() -> u64 {
    30
}

fn default_commit_timeout() -> u64 {
    10
}

fn default_max_commit_retries() -> u32 {
    3
}

fn default_draft_cache_size() -> usize {
    64
}

fn default_playbook_path() -> PathBuf {
    PathBuf::from("~/.ace/playbook.json")
}

fn default_episodic_backend() -> EpisodicBackend {
    EpisodicBackend::Sqlite
}

fn default_episodic_path() -> PathBuf {
    PathBuf::from("~/.ace/episodic.db")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("~/.ace/sakila.db")
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            max_snippets: default_max_snippets(),
            priority: default_priority(),
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            neutral_correctness: default_neutral_correctness(),
        }
    }
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            penalize_used_items: true,
            semantic_dedup: false,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            generate_timeout_secs: default_generate_timeout(),
            execute_timeout_secs: default_execute_timeout(),
            reflect_timeout_secs: default_reflect_timeout(),
            curate_timeout_secs: default_curate_timeout(),
            commit_timeout_secs: default_commit_timeout(),
            max_commit_retries: default_max_commit_retries(),
            draft_cache_size: default_draft_cache_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            playbook_path: default_playbook_path(),
            episodic_backend: default_episodic_backend(),
            episodic_path: default_episodic_path(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// Loads from ~/.ace/config.toml, writing a default configuration there
    /// first if the file does not exist.
    pub fn load_or_create() -> Result<Self, AceError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, creating it with defaults if missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, AceError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, AceError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| AceError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| AceError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, AceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AceError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before path expansion so the file keeps portable `~` paths
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| AceError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AceError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    fn default_config_path() -> Result<PathBuf, AceError> {
        let home = dirs::home_dir()
            .ok_or_else(|| AceError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".ace").join("config.toml"))
    }

    /// Configuration with every section at its default
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LlmConfig::default(),
            context: ContextConfig::default(),
            evaluator: EvaluatorConfig::default(),
            curator: CuratorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
        }
    }

    /// Validate values, expand paths and ensure the data directory exists
    fn validate_and_process(&mut self) -> Result<(), AceError> {
        self.validate()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.storage.playbook_path = expand_path(&self.storage.playbook_path)?;
        self.storage.episodic_path = expand_path(&self.storage.episodic_path)?;
        self.database.path = expand_path(&self.database.path)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                AceError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Value checks only, no filesystem access
    pub fn validate(&self) -> Result<(), AceError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(AceError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AceError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.context.budget_tokens == 0 {
            return Err(AceError::Config(
                "context.budget_tokens must be greater than 0".to_string(),
            ));
        }

        let mut priority = self.context.priority.clone();
        priority.sort();
        priority.dedup();
        if priority.len() != ContextSlot::DEFAULT_PRIORITY.len()
            || self.context.priority.len() != ContextSlot::DEFAULT_PRIORITY.len()
        {
            return Err(AceError::Config(
                "context.priority must list schema_rules, sql_patterns, common_mistakes and retrieved_snippets exactly once".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.evaluator.neutral_correctness) {
            return Err(AceError::Config(
                "evaluator.neutral_correctness must be between 0.0 and 1.0".to_string(),
            ));
        }

        let orchestrator = &self.orchestrator;
        let timeouts = [
            ("generate_timeout_secs", orchestrator.generate_timeout_secs),
            ("execute_timeout_secs", orchestrator.execute_timeout_secs),
            ("reflect_timeout_secs", orchestrator.reflect_timeout_secs),
            ("curate_timeout_secs", orchestrator.curate_timeout_secs),
            ("commit_timeout_secs", orchestrator.commit_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(AceError::Config(format!(
                    "orchestrator.{} must be greater than 0",
                    name
                )));
            }
        }

        if !(1..=10).contains(&orchestrator.max_commit_retries) {
            return Err(AceError::Config(
                "orchestrator.max_commit_retries must be between 1 and 10".to_string(),
            ));
        }

        if orchestrator.draft_cache_size == 0 {
            return Err(AceError::Config(
                "orchestrator.draft_cache_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand a leading ~ to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, AceError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| AceError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| AceError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| AceError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.context.budget_tokens, 8000);
        assert_eq!(config.orchestrator.max_commit_retries, 3);
        assert_eq!(config.storage.episodic_backend, EpisodicBackend::Sqlite);
        assert!(config.curator.penalize_used_items);
        assert!(!config.curator.semantic_dedup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_priority_must_be_permutation() {
        let mut config = Config::default_config();
        config.context.priority = vec![
            ContextSlot::SchemaRules,
            ContextSlot::SchemaRules,
            ContextSlot::CommonMistakes,
            ContextSlot::RetrievedSnippets,
        ];
        assert!(matches!(config.validate(), Err(AceError::Config(_))));

        config.context.priority.truncate(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = Config::default_config();
        config.orchestrator.max_commit_retries = 0;
        assert!(config.validate().is_err());
        config.orchestrator.max_commit_retries = 11;
        assert!(config.validate().is_err());
        config.orchestrator.max_commit_retries = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.context.priority, deserialized.context.priority);
        assert_eq!(config.llm.api_key_env, deserialized.llm.api_key_env);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str("[core]\nlog_level = \"debug\"\n").unwrap();
        assert_eq!(config.core.log_level, "debug");
        assert_eq!(config.orchestrator.draft_cache_size, 64);
        assert_eq!(config.evaluator.neutral_correctness, 0.5);
    }
}
