//! Example HTTP microservice built on the skeleton infrastructure.
//!
//! Copy this crate to start a new service: replace [`api`] with real routes and
//! [`worker`] with real background jobs.
//!
//! # Endpoints
//!
//! - `GET /api/v1/example?name=<name>` - Greeting example
//! - `GET /ping` - Reachability check
//! - `GET /status` - Service identity and uptime
//! - `GET /health`, `/health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe (503 while shutting down)
//! - `GET /metrics` - Prometheus metrics endpoint
//!
//! # Configuration
//!
//! - `HOST` / `PORT` - Listen address (default: 0.0.0.0:8080)
//! - `SERVICE_NAME`, `SERVICE_VERSION`, `ENVIRONMENT` - Service identity
//! - `HTTP_REQUEST_TIMEOUT` - Per-request timeout in seconds, above 30 (default: unset)
//! - `CORS_ENABLED` - Permissive CORS (default: true)
//! - `RUST_LOG` / `LOG_LEVEL` - Log level (default: info)
//! - `LOG_FORMAT` - Log format: json (default) or text
//! - `TRACING_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `TRACING_SAMPLING_RATE` - Span export
//! - `METRICS_ENABLED`, `METRICS_NAMESPACE`, `METRICS_PATH` - Prometheus metrics
//!
//! Variables may also be placed in a `.env` file in the working directory.

mod api;
mod worker;

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use skeleton_service_shared::{
    init_logging, spawn_signal_listener, AppState, BasicRoutes, ExitStatus, Lifecycle, Metrics,
    RouterBuilder, ServiceConfig, Telemetry,
};

use crate::api::ExampleApi;
use crate::worker::ExampleWorker;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet.
            eprintln!("invalid configuration: {e}");
            return ExitStatus::Failure.into();
        }
    };

    let (mut telemetry, telemetry_error) = match Telemetry::init(&config.tracing) {
        Ok(telemetry) => (telemetry, None),
        Err(e) => (Telemetry::disabled(), Some(e)),
    };
    init_logging(&config.logging, telemetry.tracer());
    if let Some(e) = telemetry_error {
        // Log but don't fail - tracing is optional
        warn!(error = %e, "failed to initialize tracing, continuing without span export");
    }

    let metrics = Metrics::new(&config.metrics).unwrap_or_else(|e| {
        // Log but don't fail - metrics are optional
        warn!(error = %e, "failed to initialize metrics, continuing without metrics");
        Metrics::disabled()
    });

    let termination = CancellationToken::new();
    let signals = match spawn_signal_listener(termination.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to register signal handlers");
            return ExitStatus::Failure.into();
        }
    };

    info!(
        service = %config.server.service_name,
        version = %config.server.service_version,
        environment = %config.server.environment,
        addr = %config.server.addr(),
        "starting service"
    );

    let state = AppState::new(config.clone(), metrics, termination.clone());
    let app = RouterBuilder::new(state)
        .basic_routes(BasicRoutes::from_config(&config))
        .register(&ExampleApi)
        .build();

    let worker = tokio::spawn(ExampleWorker::default().run(termination.clone()));

    let status = Lifecycle::new(termination.clone())
        .run(config.server.addr(), app)
        .await;

    // Stop background work on every exit path, not only after a signal.
    termination.cancel();
    if let Err(e) = worker.await {
        error!(error = %e, "example worker failed");
    }
    signals.abort();

    if let Err(e) = telemetry.shutdown() {
        warn!(error = %e, "failed to flush spans");
    }

    status.into()
}
