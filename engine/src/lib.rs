//! ACE Engine Library
//!
//! This library provides the context-evolution loop behind the `ace` binary.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Playbook model and versioned store
pub mod playbook;

/// Append-only episodic run log
pub mod episodic;

/// Database persistence module
pub mod db;

/// Language model adapters and reply parsing
pub mod llm;

/// Conductor orchestration module
pub mod conductor;

/// Bundled SQLite SQL executor
pub mod executor;

/// Keyword schema retriever
pub mod retriever;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
