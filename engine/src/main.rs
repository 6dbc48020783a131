// ACE text-to-SQL engine
// Main entry point for the ace binary

use ace_engine::cli::{Cli, Command, PlaybookAction};
use ace_engine::config::Config;
use ace_engine::handlers::{
    handle_ask, handle_history, handle_playbook_show, handle_playbook_teach, OutputFormat,
};
use ace_engine::telemetry::init_telemetry_with_level;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("ACE Engine v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Ask {
            query,
            feedback,
            interactive,
        } => handle_ask(query, feedback.map(Into::into), interactive, &config, format).await,

        Command::Playbook { action } => match action {
            PlaybookAction::Show => handle_playbook_show(&config, format).await,
            PlaybookAction::Teach { section, content } => {
                handle_playbook_teach(section.into(), content, &config, format).await
            }
        },

        Command::History { limit } => {
            tracing::info!("Fetching run history (limit: {})", limit);
            handle_history(limit, &config, format).await
        }
    }
}
