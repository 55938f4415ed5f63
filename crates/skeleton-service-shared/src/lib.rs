//! Shared infrastructure for skeleton HTTP microservices.
//!
//! A service crate supplies routes and background work; everything around
//! them lives here:
//!
//! - [`config`]: Typed settings read from environment variables and `.env`
//! - [`logging`]: Structured JSON or text logging setup
//! - [`telemetry`]: OpenTelemetry span export and W3C trace-context extraction
//! - [`metrics`]: Prometheus metrics with an explicit, non-global registry
//! - [`middleware`]: Request IDs, request spans, metrics and request logging
//! - [`router`]: Router assembly with the standard middleware stack
//! - [`health`]: Liveness and readiness probe handlers
//! - [`ProblemDetails`]: `application/problem+json` error bodies
//! - [`ServiceResponse`]: JSON envelope for successful results
//! - [`lifecycle`]: Server start, termination wait and bounded graceful shutdown
//! - [`signal`]: SIGINT/SIGTERM handling feeding a cancellation token
//!
//! # Startup order
//!
//! 1. [`ServiceConfig::load`]
//! 2. [`Telemetry::init`], then [`init_logging`] with its tracer
//! 3. [`Metrics::new`] and [`spawn_signal_listener`]
//! 4. [`RouterBuilder`] with [`BasicRoutes`] and the service's [`RouteRegistrar`]s
//! 5. [`Lifecycle::run`] until the termination token is cancelled
//! 6. [`Telemetry::shutdown`] to flush buffered spans
//!
//! Fixtures for handler tests live in `test_utils` behind the `test-utils`
//! feature.

pub mod config;
pub mod env;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod middleware;
mod problem;
mod request;
mod response;
pub mod router;
pub mod signal;
mod state;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigError, ServerConfig, ServiceConfig};
pub use env::{Env, MissingVar};
pub use health::{health_live, health_ready, HealthStatus};
pub use lifecycle::{
    ExitStatus, Lifecycle, LifecycleError, LifecycleState, Termination, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{metrics_handler, Metrics, MetricsConfig, MetricsError};
pub use middleware::{extract_or_generate_request_id, MetricsLayer, RequestId};
pub use problem::{
    ProblemDetails, PROBLEM_CONTENT_TYPE, PROBLEM_INTERNAL_ERROR, PROBLEM_INVALID_REQUEST,
    PROBLEM_NOT_FOUND, PROBLEM_REQUEST_TIMEOUT, PROBLEM_SERVICE_UNAVAILABLE,
};
pub use request::{require_non_blank, Validate};
pub use response::ServiceResponse;
pub use router::{BasicRoutes, RouteRegistrar, RouterBuilder};
pub use signal::spawn_signal_listener;
pub use state::AppState;
pub use telemetry::{Telemetry, TelemetryError, TracingConfig};
