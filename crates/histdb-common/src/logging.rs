//! Logging configuration and initialization
//!
//! Centralized tracing setup for every histdb component. Supports console
//! and rotating-file output with either human-readable text or JSON
//! formatting, configured from the environment.
//!
//! Components never use `println!`; all diagnostics go through the
//! structured `tracing` macros with fields:
//!
//! ```rust,ignore
//! tracing::info!(sequence = bundle.sequence, rows = rows.len(), "ledger flushed");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured log shipping
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Rotating file output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutput {
    /// Directory for log files
    pub dir: PathBuf,
    /// File name prefix ("histdb" -> "histdb.2026-08-24.log")
    pub prefix: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directives, same syntax as `RUST_LOG`
    /// (e.g. "info,sqlx=warn,histdb_ingest=debug")
    pub filter: String,

    /// Log format (text or JSON)
    pub format: LogFormat,

    /// Optional daily-rotating file output in addition to the console
    pub file: Option<FileOutput>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// - `HISTDB_LOG`: filter directives (default "info")
    /// - `HISTDB_LOG_FORMAT`: "text" or "json"
    /// - `HISTDB_LOG_DIR`: enables file output into this directory
    /// - `HISTDB_LOG_PREFIX`: log file prefix (default "histdb")
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(filter) = std::env::var("HISTDB_LOG") {
            config.filter = filter;
        }

        if let Ok(format) = std::env::var("HISTDB_LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("HISTDB_LOG_DIR") {
            let prefix =
                std::env::var("HISTDB_LOG_PREFIX").unwrap_or_else(|_| "histdb".to_string());
            config.file = Some(FileOutput {
                dir: PathBuf::from(dir),
                prefix,
            });
        }

        Ok(config)
    }
}

/// Initialize the global tracing subscriber
///
/// Should be called once at startup; a second call returns an error from
/// `try_init`.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter).context("Failed to parse log filter")?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let file_writer = match &config.file {
        Some(output) => {
            std::fs::create_dir_all(&output.dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(&output.dir, &output.prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The guard must outlive the subscriber; leak it for the
            // lifetime of the process.
            std::mem::forget(guard);
            Some(writer)
        },
        None => None,
    };

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_writer.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
                .try_init()?;
        },
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer.json())
                .with(file_writer.map(|w| fmt::layer().with_writer(w).with_ansi(false).json()))
                .try_init()?;
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.file.is_none());
    }
}
