//! Process-wide `tracing` subscriber setup.
//!
//! # Variables
//!
//! - `LOG_FORMAT`: Output format, either `json` (default) or `text`
//! - `LOG_LEVEL`: Default level filter (default: `info`)
//! - `RUST_LOG`: Full filter directive, takes precedence over `LOG_LEVEL`
//!
//! # Example
//!
//! ```ignore
//! use skeleton_service_shared::env::Env;
//! use skeleton_service_shared::logging::{LoggingConfig, init_logging};
//! use skeleton_service_shared::telemetry::{Telemetry, TracingConfig};
//!
//! let telemetry = Telemetry::init(&TracingConfig::default())?;
//! let config = LoggingConfig::from_env(&Env::process());
//! init_logging(&config, telemetry.tracer());
//! ```

use opentelemetry::trace::Tracer;
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::PreSampledTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::env::Env;

/// How log lines are rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line output for local development.
    Text,
}

impl LogFormat {
    /// `text` and `pretty` select [`LogFormat::Text`], case-insensitively.
    /// Anything else falls back to JSON.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("text") || s.eq_ignore_ascii_case("pretty") {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `skeleton=debug`.
    pub level: String,
    pub service: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            service: None,
        }
    }
}

impl LoggingConfig {
    /// Reads `LOG_FORMAT`, `LOG_LEVEL` and `SERVICE_NAME`.
    pub fn from_env(env: &Env) -> Self {
        Self {
            format: LogFormat::parse(&env.get_string("LOG_FORMAT", "json")),
            level: env.get_string("LOG_LEVEL", "info"),
            service: env.require("SERVICE_NAME").ok(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// Install the global subscriber. Call once, before anything logs.
///
/// `RUST_LOG` wins over `config.level` when set. Passing a `tracer` adds a
/// layer that exports every span through it.
///
/// # JSON
///
/// ```json
/// {"timestamp":"2026-01-30T10:00:00Z","level":"INFO","target":"skeleton_service","message":"..."}
/// ```
///
/// # Text
///
/// ```text
/// 2026-01-30T10:00:00Z  INFO skeleton_service: service starting
/// ```
pub fn init_logging<T>(config: &LoggingConfig, tracer: Option<T>)
where
    T: Tracer + PreSampledTracer + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
    let exporting = otel_layer.is_some();

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    match config.format {
        LogFormat::Text => {
            registry.with(fmt::layer().pretty()).init();
        }
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false);

            registry.with(json_layer).init();
        }
    }

    tracing::debug!(
        service = config.service.as_deref().unwrap_or("-"),
        format = ?config.format,
        exporting_spans = exporting,
        "logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        for text in ["text", "Text", "PRETTY"] {
            assert_eq!(LogFormat::parse(text), LogFormat::Text, "{text}");
        }
        for json in ["json", "JSON", "", "yaml"] {
            assert_eq!(LogFormat::parse(json), LogFormat::Json, "{json}");
        }
    }

    #[test]
    fn test_logging_config_from_empty_env() {
        let config = LoggingConfig::from_env(&Env::from_pairs(Vec::<(&str, &str)>::new()));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
        assert!(config.service.is_none());
    }

    #[test]
    fn test_logging_config_from_env() {
        let env = Env::from_pairs([
            ("LOG_FORMAT", "text"),
            ("LOG_LEVEL", "debug"),
            ("SERVICE_NAME", "orders"),
        ]);
        let config = LoggingConfig::from_env(&env);

        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "debug");
        assert_eq!(config.service.as_deref(), Some("orders"));
    }
}
