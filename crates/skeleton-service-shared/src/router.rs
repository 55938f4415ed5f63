//! HTTP router assembly.
//!
//! [`RouterBuilder`] collects routes from [`RouteRegistrar`]s, adds a problem
//! details fallback and wraps everything in the standard middleware stack.
//! Layers, outermost first:
//!
//! 1. CORS (when `CORS_ENABLED`)
//! 2. `X-Request-ID` assignment (UUID v7 when absent)
//! 3. `X-Request-ID` propagation to the response
//! 4. Request span, joined to an incoming W3C trace
//! 5. HTTP metrics
//! 6. Request log line
//! 7. Panic recovery (500 problem details)
//! 8. Request timeout (408, only when `HTTP_REQUEST_TIMEOUT` is set)
//!
//! # Example
//!
//! ```ignore
//! use axum::routing::get;
//! use skeleton_service_shared::router::{BasicRoutes, RouterBuilder};
//!
//! let app = RouterBuilder::new(state.clone())
//!     .basic_routes(BasicRoutes::from_config(state.config()))
//!     .route("/hello", get(|| async { "hello" }))
//!     .build();
//! ```

use std::time::Duration;

use axum::{
    http::{header, HeaderName, Method, StatusCode, Uri},
    routing::{get, MethodRouter},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServiceConfig;
use crate::handlers::{ping, status};
use crate::health::{health_live, health_ready};
use crate::metrics::metrics_handler;
use crate::middleware::{
    log_requests, make_request_span, panic_response, MakeRequestUuidV7, MetricsLayer,
};
use crate::problem::ProblemDetails;
use crate::AppState;

/// A group of routes that can be mounted on a router.
///
/// Services implement this for each API area and hand the registrar to
/// [`RouterBuilder::register`].
pub trait RouteRegistrar {
    /// Add this group's routes to `router`.
    fn register_routes(&self, router: Router<AppState>) -> Router<AppState>;
}

/// Paths of the built-in endpoints. An empty path leaves that endpoint out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicRoutes {
    /// Base health path; `/live` and `/ready` are mounted below it.
    pub health_path: String,
    pub ping_path: String,
    pub status_path: String,
    pub metrics_path: String,
}

impl Default for BasicRoutes {
    fn default() -> Self {
        Self {
            health_path: "/health".to_string(),
            ping_path: "/ping".to_string(),
            status_path: "/status".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl BasicRoutes {
    /// Default paths with the metrics endpoint taken from configuration.
    ///
    /// The metrics route is left out when metrics are disabled.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            metrics_path: if config.metrics.enabled {
                config.metrics.path.clone()
            } else {
                String::new()
            },
            ..Self::default()
        }
    }
}

impl RouteRegistrar for BasicRoutes {
    fn register_routes(&self, mut router: Router<AppState>) -> Router<AppState> {
        if !self.health_path.is_empty() {
            let base = self.health_path.trim_end_matches('/');
            router = router
                .route(&self.health_path, get(health_live))
                .route(&format!("{}/live", base), get(health_live))
                .route(&format!("{}/ready", base), get(health_ready));
        }
        if !self.ping_path.is_empty() {
            router = router.route(&self.ping_path, get(ping));
        }
        if !self.status_path.is_empty() {
            router = router.route(&self.status_path, get(status));
        }
        if !self.metrics_path.is_empty() {
            router = router.route(&self.metrics_path, get(metrics_handler));
        }
        router
    }
}

/// Builder for the service's top-level router.
pub struct RouterBuilder {
    state: AppState,
    router: Router<AppState>,
}

impl RouterBuilder {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            router: Router::new(),
        }
    }

    /// Mount the built-in health, ping, status and metrics endpoints.
    pub fn basic_routes(self, routes: BasicRoutes) -> Self {
        self.register(&routes)
    }

    /// Mount a group of routes.
    pub fn register<R: RouteRegistrar + ?Sized>(mut self, registrar: &R) -> Self {
        self.router = registrar.register_routes(self.router);
        self
    }

    /// Mount a single route.
    pub fn route(mut self, path: &str, method_router: MethodRouter<AppState>) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    /// Mount `router` under `prefix` (e.g. `/api/v1`).
    pub fn nest(mut self, prefix: &str, router: Router<AppState>) -> Self {
        self.router = self.router.nest(prefix, router);
        self
    }

    /// Add the fallback and middleware stack and bind the state.
    pub fn build(self) -> Router {
        let server = &self.state.config().server;
        let cors_enabled = server.cors_enabled;

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(MetricsLayer::new(self.state.metrics().clone()))
            .layer(axum::middleware::from_fn(log_requests))
            .layer(CatchPanicLayer::custom(panic_response));

        let mut router = self.router.fallback(not_found);
        if let Some(timeout) = server.request_timeout {
            router = router.layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            ));
        }
        router = router.layer(middleware);
        if cors_enabled {
            router = router.layer(cors_layer());
        }

        router.with_state(self.state)
    }
}

/// Permissive CORS policy for browser clients.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([header::LINK])
        .max_age(Duration::from_secs(300))
}

async fn not_found(uri: Uri) -> ProblemDetails {
    ProblemDetails::not_found(uri.path())
}
