//! Prometheus metrics behind an explicit [`Metrics`] handle.
//!
//! The recorder is never installed globally. Every recording goes through
//! [`Metrics::in_scope`], which makes the handle's recorder current for the
//! duration of a closure, so several independent registries can coexist in
//! one process (one per test, for instance).
//!
//! ```no_run
//! use skeleton_service_shared::metrics::{Metrics, MetricsConfig};
//!
//! let metrics = Metrics::new(&MetricsConfig::default()).expect("failed to build recorder");
//!
//! metrics.in_scope(|| {
//!     ::metrics::counter!("orders_created_total").increment(1);
//! });
//!
//! println!("{}", metrics.render().unwrap_or_default());
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::NoopRecorder;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::AppState;

/// Histogram buckets used for request latencies (Prometheus client defaults).
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// When false nothing is recorded and the exposition route is not mounted.
    pub enabled: bool,
    /// Prepended to every series name with an underscore.
    pub namespace: String,
    /// Route serving the text exposition format.
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "service".to_string(),
            path: "/metrics".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Reads `METRICS_ENABLED`, `METRICS_NAMESPACE` and `METRICS_PATH`,
    /// keeping the default for any that are unset.
    pub fn from_env(env: &Env) -> Self {
        let defaults = Self::default();
        Self {
            enabled: env.get_bool("METRICS_ENABLED", defaults.enabled),
            namespace: env.get_string("METRICS_NAMESPACE", &defaults.namespace),
            path: env.get_string("METRICS_PATH", &defaults.path),
        }
    }
}

/// Failure to build the Prometheus recorder.
#[derive(Debug, Clone)]
pub enum MetricsError {
    /// The histogram bucket configuration was rejected.
    InvalidBuckets(String),
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::InvalidBuckets(e) => {
                write!(f, "invalid histogram buckets: {}", e)
            }
        }
    }
}

impl std::error::Error for MetricsError {}

struct Registry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

/// Cheaply cloneable handle to the service's metric registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Option<Arc<Registry>>,
    namespace: String,
}

impl Metrics {
    /// Build a Prometheus recorder for the given configuration.
    ///
    /// A disabled configuration yields the same handle as [`Metrics::disabled`].
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        if !config.enabled {
            return Ok(Self::disabled_with_namespace(&config.namespace));
        }

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_seconds".to_string()),
                DEFAULT_LATENCY_BUCKETS,
            )
            .map_err(|e| MetricsError::InvalidBuckets(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            registry: Some(Arc::new(Registry { recorder, handle })),
            namespace: config.namespace.clone(),
        })
    }

    /// A handle that discards every measurement.
    pub fn disabled() -> Self {
        Self::disabled_with_namespace(&MetricsConfig::default().namespace)
    }

    fn disabled_with_namespace(namespace: &str) -> Self {
        Self {
            registry: None,
            namespace: namespace.to_string(),
        }
    }

    /// Whether measurements are being kept.
    pub fn is_enabled(&self) -> bool {
        self.registry.is_some()
    }

    /// Prefix `name` with the configured namespace.
    pub fn name(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.namespace, name)
        }
    }

    /// Run `f` with this handle's recorder as the current recorder.
    ///
    /// Any `metrics::counter!`, `gauge!` or `histogram!` call inside `f`
    /// records into this registry. Disabled handles use a no-op recorder.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.registry {
            Some(registry) => metrics::with_local_recorder(&registry.recorder, f),
            None => metrics::with_local_recorder(&NoopRecorder, f),
        }
    }

    /// Render the registry in Prometheus exposition format.
    ///
    /// Returns `None` when metrics are disabled.
    pub fn render(&self) -> Option<String> {
        self.registry.as_ref().map(|registry| {
            registry.handle.run_upkeep();
            registry.handle.render()
        })
    }

    /// Increment the in-flight request gauge.
    pub fn request_started(&self) {
        let name = self.name("http_requests_in_flight");
        self.in_scope(|| metrics::gauge!(name).increment(1.0));
    }

    /// Decrement the in-flight gauge for a request that never produced a response.
    pub fn request_abandoned(&self) {
        let name = self.name("http_requests_in_flight");
        self.in_scope(|| metrics::gauge!(name).decrement(1.0));
    }

    /// Record a completed request and decrement the in-flight gauge.
    pub fn request_finished(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        let in_flight = self.name("http_requests_in_flight");
        let total = self.name("http_requests_total");
        let duration = self.name("http_request_duration_seconds");

        self.in_scope(|| {
            metrics::gauge!(in_flight).decrement(1.0);
            metrics::counter!(
                total,
                "method" => method.to_string(),
                "endpoint" => endpoint.to_string(),
                "status" => status.to_string()
            )
            .increment(1);
            metrics::histogram!(
                duration,
                "method" => method.to_string(),
                "endpoint" => endpoint.to_string()
            )
            .record(elapsed.as_secs_f64());
        });
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.is_enabled())
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Serves the configured metrics path.
///
/// Returns Prometheus exposition format text, or 404 when metrics are disabled.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics().render() {
        Some(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
