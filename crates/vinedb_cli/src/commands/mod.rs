//! CLI command implementations.

pub mod demo;
pub mod stress;

use std::str::FromStr;

/// Errors raised by the CLI itself, as opposed to the engine.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Unknown `--format` value.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// Unknown `--scenario` value.
    #[error("unknown scenario '{0}' (expected tags, graph, unique or nested)")]
    UnknownScenario(String),

    /// The indexes disagree with the records after a run.
    #[error("verification failed: {0}")]
    Verification(#[from] vinedb_core::CoreError),
}

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}
