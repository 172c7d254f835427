//! Logging setup for the recast binaries.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::Result;

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

/// Initialize logging: console always, plus an append-mode file sink
/// when the config names one.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(parse_level(&config.level).into());

    match &config.file {
        Some(path) => {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = std::io::stderr.and(Arc::new(file));
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .with(filter)
                .init();
        }
    }
    Ok(())
}

/// Map the usual -q/-v flags onto a level string: verbose wins over
/// quiet, intentionally.
pub fn level_from_flags(quiet: bool, verbose: bool) -> &'static str {
    if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    }
}
