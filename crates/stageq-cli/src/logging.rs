//! Structured logging setup for the stageq binary
//!
//! Console output goes to stderr so stdout carries only the rendered query
//! text and the result document.
//!
//! Environment variables:
//! - `RUST_LOG`: filter directives (e.g. "info", "stageq_engine=debug")
//! - `LOG_FORMAT`: "pretty", "json" or "compact"
//! - `LOG_OUTPUT`: "stderr", "file" or "both"
//! - `LOG_DIR`: directory for daily-rotated log files (default "./logs")

use thiserror::Error;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("Failed to install subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("json") => LogFormat::Json,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Console only; "stdout" is accepted and still writes to stderr
    Stderr,
    File,
    Both,
}

impl LogOutput {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_OUTPUT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Stderr,
        }
    }
}

type Subscriber = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Subscriber> + Send + Sync>;

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    }
}

fn file_layer(log_dir: &str) -> Result<BoxedLayer, LoggingError> {
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("stageq")
        .filename_suffix("log")
        .build(log_dir)?;
    Ok(fmt::layer().with_writer(appender).with_ansi(false).boxed())
}

/// Install the global subscriber from the logging environment variables.
pub fn init() -> Result<(), LoggingError> {
    let format = LogFormat::from_env();
    let output = LogOutput::from_env();
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if matches!(output, LogOutput::Stderr | LogOutput::Both) {
        layers.push(console_layer(format));
    }
    if matches!(output, LogOutput::File | LogOutput::Both) {
        layers.push(file_layer(&log_dir)?);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::debug!("Logging initialized (format {:?}, output {:?})", format, output);
    if output != LogOutput::Stderr {
        tracing::debug!("Log directory: {}", log_dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("compact")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("fancy")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }

    #[test]
    fn test_log_output_parse() {
        assert_eq!(LogOutput::parse(Some("file")), LogOutput::File);
        assert_eq!(LogOutput::parse(Some("both")), LogOutput::Both);
        assert_eq!(LogOutput::parse(Some("stdout")), LogOutput::Stderr);
        assert_eq!(LogOutput::parse(None), LogOutput::Stderr);
    }
}
