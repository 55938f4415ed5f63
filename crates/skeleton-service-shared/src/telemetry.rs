//! OpenTelemetry distributed tracing.
//!
//! [`Telemetry`] owns the tracer provider for the lifetime of the process.
//! Nothing is registered globally: the tracer is handed to
//! [`init_logging`](crate::logging::init_logging) so `tracing` spans are
//! exported, and the W3C trace-context propagator lives in
//! [`extract_trace_context`] for the request span.
//!
//! # Environment Variables
//!
//! - `TRACING_ENABLED`: enable span export (default: `false`)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP/gRPC collector (default: `http://localhost:4317`)
//! - `TRACING_SAMPLING_RATE`: ratio of root traces sampled, `0.0..=1.0` (default: `1.0`)

use http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_opentelemetry::PreSampledTracer;

use crate::env::Env;

/// Default OTLP/gRPC collector endpoint.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Configuration for span export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Whether spans are exported at all.
    pub enabled: bool,
    /// OTLP collector endpoint.
    pub endpoint: String,
    /// Ratio of root traces that are sampled.
    pub sampling_rate: f64,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            sampling_rate: 1.0,
            service_name: "service-skeleton".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl TracingConfig {
    /// Create configuration from environment variables.
    pub fn from_env(env: &Env) -> Self {
        let defaults = Self::default();
        Self {
            enabled: env.get_bool("TRACING_ENABLED", defaults.enabled),
            endpoint: env.get_string("OTEL_EXPORTER_OTLP_ENDPOINT", &defaults.endpoint),
            sampling_rate: env.get_parsed("TRACING_SAMPLING_RATE", defaults.sampling_rate),
            service_name: env.get_string("SERVICE_NAME", &defaults.service_name),
            service_version: env.get_string("SERVICE_VERSION", &defaults.service_version),
        }
    }
}

/// Errors raised while setting up or tearing down span export.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP exporter could not be built.
    #[error("failed to build OTLP exporter for {endpoint}: {message}")]
    Exporter { endpoint: String, message: String },

    /// Flushing or shutting down the provider failed.
    #[error("failed to shut down tracer provider: {0}")]
    Shutdown(String),
}

/// Owner of the OpenTelemetry tracer provider.
///
/// When tracing is disabled this holds no provider and every operation is a
/// no-op.
#[derive(Debug, Default)]
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
    service_name: String,
}

impl Telemetry {
    /// Telemetry with span export turned off.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build the exporter and tracer provider described by `config`.
    ///
    /// Returns a disabled instance when `config.enabled` is false.
    pub fn init(config: &TracingConfig) -> Result<Self, TelemetryError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.endpoint.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter {
                endpoint: config.endpoint.clone(),
                message: e.to_string(),
            })?;

        let ratio = config.sampling_rate.clamp(0.0, 1.0);
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                ratio,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(
                Resource::builder_empty()
                    .with_attributes([
                        KeyValue::new("service.name", config.service_name.clone()),
                        KeyValue::new("service.version", config.service_version.clone()),
                    ])
                    .build(),
            )
            .build();

        tracing::info!(
            endpoint = %config.endpoint,
            sampling_rate = ratio,
            "span export configured"
        );

        Ok(Self {
            provider: Some(provider),
            service_name: config.service_name.clone(),
        })
    }

    /// Whether spans are being exported.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Tracer for the `tracing-opentelemetry` layer, if export is enabled.
    pub fn tracer(
        &self,
    ) -> Option<impl opentelemetry::trace::Tracer + PreSampledTracer + Send + Sync + 'static> {
        self.provider
            .as_ref()
            .map(|provider| provider.tracer(self.service_name.clone()))
    }

    /// Flush pending spans and stop the exporter.
    ///
    /// Safe to call on a disabled instance and to call more than once.
    pub fn shutdown(&mut self) -> Result<(), TelemetryError> {
        match self.provider.take() {
            Some(provider) => provider
                .shutdown()
                .map_err(|e| TelemetryError::Shutdown(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Adapter exposing HTTP headers to the OpenTelemetry propagator.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Extract a W3C `traceparent`/`tracestate` parent context from request headers.
///
/// Returns an empty context when the headers carry no valid trace.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}
