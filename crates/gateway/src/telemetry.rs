//! Tracing subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Filter for our crates at `level`, unless `RUST_LOG` is set.
fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = format!("siem_mcp_gateway={level},siem_passthrough={level},warn");
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log level '{level}': {e}"))
}

/// Install the global subscriber, writing to stderr (stdout carries MCP stdio traffic).
///
/// # Errors
///
/// Returns an error for an invalid level or if a subscriber is already installed.
pub fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = filter(level)?;
    let installed = match format {
        LogFormat::Json => fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Pretty => fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_directives_are_validated() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(filter("debug").is_ok());
        assert!(filter("not a level!").is_err());
    }
}
