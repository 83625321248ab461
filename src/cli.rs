//! Command-line interface definition for Toolgate
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};

/// Toolgate - session-scoped tool authorization broker
///
/// Serves agent sessions over WebSocket and obtains delegated or machine
/// credentials for the tools they invoke.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Toolgate
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP server (session channel, callback, webhook)
    Serve {
        /// Address to listen on, overriding `server.bind`
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Obtain a machine credential with the background agent identity
    Token {
        /// Scopes to request (repeat or separate with spaces)
        #[arg(short, long, required = true, num_args = 1..)]
        scopes: Vec<String>,

        /// Target resource identifier
        #[arg(short, long)]
        resource: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::try_parse_from(["toolgate", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { bind: None }));
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_serve_with_bind() {
        let cli = Cli::try_parse_from(["toolgate", "-v", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_custom_config() {
        let cli = Cli::try_parse_from(["toolgate", "--config", "custom.yaml", "check-config"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("custom.yaml"));
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_cli_parse_token() {
        let cli = Cli::try_parse_from([
            "toolgate",
            "token",
            "--scopes",
            "admin_read_bookings",
            "admin_read_staff",
            "--resource",
            "booking_api",
        ])
        .unwrap();
        match cli.command {
            Commands::Token { scopes, resource } => {
                assert_eq!(scopes, vec!["admin_read_bookings", "admin_read_staff"]);
                assert_eq!(resource, "booking_api");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_token_requires_resource() {
        assert!(Cli::try_parse_from(["toolgate", "token", "--scopes", "a"]).is_err());
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["toolgate"]).is_err());
    }
}
