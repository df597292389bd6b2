// Tera terminal assistant
// Main entry point for the tera binary

use clap::Parser;
use tera_engine::cli::{Cli, Command};
use tera_engine::config::Config;
use tera_engine::handlers::{
    handle_character, handle_chat, handle_memory, handle_source, ChatOptions, OutputFormat,
};
use tera_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load_or_create_at(&config_path)?;

    // --log wins over the config; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!(
        "Tera v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        None => handle_chat(&config, ChatOptions::default()).await,
        Some(Command::Chat { new, no_memory }) => {
            handle_chat(&config, ChatOptions { new, no_memory }).await
        }
        Some(Command::Source { action }) => handle_source(action, &mut config, &config_path, format),
        Some(Command::Character { action }) => {
            handle_character(action, &mut config, &config_path, format)
        }
        Some(Command::Memory { action }) => handle_memory(action, &config, format).await,
    }
}
