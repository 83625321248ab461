//! Toolgate - session-scoped tool authorization broker
//!
#![doc = "Main entry point for the Toolgate server and CLI."]

use anyhow::Result;

use toolgate::cli::{Cli, Commands};
use toolgate::commands;
use toolgate::config::Config;
use toolgate::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Logging settings come from the configuration, so initialize after loading
    init_tracing(&config.logging)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting server");
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::CheckConfig => {
            commands::check_config::run_check_config(&config)?;
            Ok(())
        }
        Commands::Token { scopes, resource } => {
            tracing::debug!("Requesting machine token for resource {}", resource);
            commands::token::run_token(config, scopes, resource).await?;
            Ok(())
        }
    }
}
