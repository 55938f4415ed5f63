//! Service configuration.
//!
//! [`ServiceConfig`] gathers every setting the skeleton understands into one
//! typed value. It is read from environment variables, with a `.env` file in
//! the working directory as a fallback for variables the process does not
//! already define.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::{Env, MissingVar};
use crate::lifecycle::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::telemetry::TracingConfig;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting is present but unusable.
    #[error("invalid configuration for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// A required setting is absent.
    #[error(transparent)]
    Missing(#[from] MissingVar),

    /// The `.env` file exists but could not be read.
    #[error("failed to read .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub service_name: String,
    pub service_version: String,
    /// Deployment environment label (e.g., "development", "production").
    pub environment: String,
    /// Requests running longer than this are answered with 408. Unset by
    /// default, so a slow handler is only ever cut off by the shutdown
    /// deadline.
    #[serde(with = "duration_secs")]
    pub request_timeout: Option<Duration>,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            service_name: "service-skeleton".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            request_timeout: None,
            cors_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Read server settings from `env`.
    pub fn from_env(env: &Env) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_parsed("HOST", defaults.host),
            port: env.get_parsed("PORT", defaults.port),
            service_name: env.get_string("SERVICE_NAME", &defaults.service_name),
            service_version: env.get_string("SERVICE_VERSION", &defaults.service_version),
            environment: env.get_string("ENVIRONMENT", &defaults.environment),
            // 0 disables the timeout, same as leaving it unset.
            request_timeout: Some(env.get_parsed("HTTP_REQUEST_TIMEOUT", 0u64))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            cors_enabled: env.get_bool("CORS_ENABLED", defaults.cors_enabled),
        }
    }

    /// Socket address the server binds to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub tracing: TracingConfig,
    pub metrics: MetricsConfig,
}

impl ServiceConfig {
    /// Load configuration for the running process.
    ///
    /// Variables from `.env` are applied first without overriding anything
    /// already set, then the process environment is read and validated. A
    /// missing `.env` file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let config = Self::from_env(&Env::process());
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `env` without validating it.
    pub fn from_env(env: &Env) -> Self {
        let server = ServerConfig::from_env(env);
        let logging = LoggingConfig::from_env(env).with_service(server.service_name.clone());
        let tracing = TracingConfig::from_env(env);
        let metrics = MetricsConfig::from_env(env);

        Self {
            server,
            logging,
            tracing,
            metrics,
        }
    }

    /// Check that the settings can be used to start a service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "SERVICE_NAME",
                reason: "must not be empty".to_string(),
            });
        }

        if let Some(timeout) = self.server.request_timeout {
            if timeout <= DEFAULT_SHUTDOWN_TIMEOUT {
                return Err(ConfigError::Invalid {
                    key: "HTTP_REQUEST_TIMEOUT",
                    reason: format!(
                        "{}s must exceed the {}s shutdown deadline",
                        timeout.as_secs(),
                        DEFAULT_SHUTDOWN_TIMEOUT.as_secs()
                    ),
                });
            }
        }

        if !(0.0..=1.0).contains(&self.tracing.sampling_rate) {
            return Err(ConfigError::Invalid {
                key: "TRACING_SAMPLING_RATE",
                reason: format!("{} is outside 0.0..=1.0", self.tracing.sampling_rate),
            });
        }

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "METRICS_PATH",
                reason: format!("{:?} must start with '/'", self.metrics.path),
            });
        }

        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
