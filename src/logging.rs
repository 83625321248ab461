//! Tracing subscriber setup
//!
//! JSON or human-readable output to stdout, optionally mirrored to a file.
//! `RUST_LOG` wins over the configured level when set.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds the filter: `RUST_LOG` if set, otherwise `level`
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}

/// Installs the global subscriber
///
/// # Errors
///
/// Returns an error when the level directive is invalid or the log file
/// cannot be opened.
///
/// # Examples
///
/// ```no_run
/// use toolgate::config::LoggingConfig;
/// use toolgate::logging::init_tracing;
///
/// init_tracing(&LoggingConfig::default()).unwrap();
/// tracing::info!("ready");
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(&config.level)?);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.json {
        let stdout_layer = fmt::layer().json().with_current_span(true);
        match file {
            Some(file) => {
                let file_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(file);
                registry.with(stdout_layer).with(file_layer).try_init()?;
            }
            None => registry.with(stdout_layer).try_init()?,
        }
    } else {
        let stdout_layer = fmt::layer().with_target(true).with_level(true);
        match file {
            Some(file) => {
                let file_layer = fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(file);
                registry.with(stdout_layer).with(file_layer).try_init()?;
            }
            None => registry.with(stdout_layer).try_init()?,
        }
    }

    Ok(())
}
