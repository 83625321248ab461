/*!
Command handlers for the CLI

- `serve`        Run the HTTP server
- `check_config` Report the effective configuration after validation
- `token`        One-off machine credential exchange with the background identity
*/

use crate::auth::manager::SessionAuthManager;
use crate::auth::types::AuthRequirement;
use crate::config::Config;
use crate::error::{Result, ToolgateError};

// Server command handler
pub mod serve {
    //! Runs the broker until interrupted.

    use super::*;

    /// Start the HTTP server
    pub async fn run_serve(config: Config) -> Result<()> {
        crate::server::serve(config).await
    }
}

// Configuration check
pub mod check_config {
    //! Summarises a configuration that already passed validation.

    use super::*;

    /// One line per notable setting, secrets omitted
    pub fn summary(config: &Config) -> Vec<String> {
        let session_tools = config
            .tools
            .iter()
            .filter(|tool| tool.audience.includes_session())
            .count();
        let background_tools = config
            .tools
            .iter()
            .filter(|tool| tool.audience.includes_background())
            .count();

        vec![
            format!("bind: {}", config.server.bind),
            format!("identity provider: {}", config.identity_provider.base_url),
            format!("session agent: {}", display_id(&config.agent.agent_id)),
            format!(
                "background agent: {}",
                if config.background.enabled {
                    display_id(&config.background.agent.agent_id)
                } else {
                    "disabled"
                }
            ),
            format!(
                "tools: {} ({} session, {} background)",
                config.tools.len(),
                session_tools,
                background_tools
            ),
        ]
    }

    fn display_id(id: &str) -> &str {
        if id.is_empty() {
            "<unset>"
        } else {
            id
        }
    }

    /// Print the summary
    pub fn run_check_config(config: &Config) -> Result<()> {
        println!("Configuration OK");
        for line in summary(config) {
            println!("  {}", line);
        }
        Ok(())
    }
}

// Machine token command handler
pub mod token {
    //! Exercises the background authorization path from the command line.
    //!
    //! Prints the token type and expiry, never the token itself.

    use super::*;

    /// Splits repeated and space-separated scope arguments
    pub fn parse_scopes(scopes: &[String]) -> Vec<String> {
        scopes
            .iter()
            .flat_map(|s| s.split_whitespace())
            .map(str::to_string)
            .collect()
    }

    /// Obtain and describe a machine credential
    pub async fn run_token(config: Config, scopes: Vec<String>, resource: String) -> Result<()> {
        if !config.background.agent.is_configured() {
            return Err(ToolgateError::Config(
                "background.agent.agent_id and agent_secret are required for token".to_string(),
            )
            .into());
        }

        let requirement = AuthRequirement::machine(parse_scopes(&scopes), resource)?;
        let exchange = crate::server::exchange_client(&config)?;
        let manager = SessionAuthManager::new_machine(config.background.agent.clone(), exchange);

        tracing::info!(%requirement, "Requesting machine credential");
        let credential = manager.acquire(&requirement).await?;
        manager.close();

        println!("Obtained {} token for {}", credential.token_type, requirement);
        match credential.expires_at {
            Some(expires_at) => println!("Expires at {}", expires_at.to_rfc3339()),
            None => println!("No expiry reported"),
        }
        Ok(())
    }
}
