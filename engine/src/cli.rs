//! CLI interface for ACE
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the learning loop.

use ace_sdk::Feedback;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::playbook::Section;

/// ACE text-to-SQL engine
///
/// Answers questions about a SQLite database with generated SQL and learns
/// from your feedback by evolving a playbook of reusable guidance.
#[derive(Parser, Debug)]
#[command(name = "ace")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a question with generated SQL
    Ask {
        /// Natural-language question
        query: String,

        /// Judge the answer up front
        #[arg(long, value_enum)]
        feedback: Option<FeedbackArg>,

        /// Prompt for feedback after showing the result
        #[arg(long, short, conflicts_with = "feedback")]
        interactive: bool,
    },

    /// Inspect or edit the playbook
    Playbook {
        #[command(subcommand)]
        action: PlaybookAction,
    },

    /// Show recent runs from episodic memory
    History {
        /// Number of runs to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// Playbook actions
#[derive(Subcommand, Debug)]
pub enum PlaybookAction {
    /// Print every section and item
    Show,

    /// Add a lesson by hand
    Teach {
        /// Target section
        #[arg(long, value_enum, default_value = "common-mistakes")]
        section: SectionArg,

        /// Lesson text
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeedbackArg {
    Correct,
    Incorrect,
}

impl From<FeedbackArg> for Feedback {
    fn from(arg: FeedbackArg) -> Self {
        match arg {
            FeedbackArg::Correct => Feedback::Correct,
            FeedbackArg::Incorrect => Feedback::Incorrect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SectionArg {
    SchemaRules,
    SqlPatterns,
    CommonMistakes,
}

impl From<SectionArg> for Section {
    fn from(arg: SectionArg) -> Self {
        match arg {
            SectionArg::SchemaRules => Section::SchemaRules,
            SectionArg::SqlPatterns => Section::SqlPatterns,
            SectionArg::CommonMistakes => Section::CommonMistakes,
        }
    }
}
