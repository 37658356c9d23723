//! Structured logging setup.
//!
//! Supports two modes:
//! - Development: Pretty-printed human-readable logs
//! - Production: JSON-formatted logs for log aggregation
//!
//! Set `ARCHREG_LOG_FORMAT=json` for JSON logs.
//! Set `RUST_LOG` to control log levels (default: info).

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const FORMAT_ENV: &str = "ARCHREG_LOG_FORMAT";

/// Log format mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed human-readable logs (default).
    Pretty,
    /// JSON-formatted logs for production.
    Json,
}

impl LogFormat {
    /// Detect log format from environment.
    pub fn from_env() -> Self {
        Self::parse(&std::env::var(FORMAT_ENV).unwrap_or_default())
    }

    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialize logging with the format taken from the environment.
///
/// `RUST_LOG` wins over `level` when both are set. A second call is an
/// error from `try_init`, which is returned rather than panicking.
pub fn init(level: &str) -> anyhow::Result<()> {
    init_with_format(level, LogFormat::from_env())
}

pub fn init_with_format(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = match format {
        LogFormat::Pretty => Box::new(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr),
        ),
        LogFormat::Json => Box::new(
            fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging subscriber init failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        // Case insensitive
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    }

    #[test]
    fn init_twice_does_not_panic() {
        // The subscriber may already be set by another test.
        let _ = init_with_format("warn", LogFormat::Pretty);
        assert!(init_with_format("warn", LogFormat::Json).is_err());
    }
}
