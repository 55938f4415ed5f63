//! Per-request plumbing installed by [`RouterBuilder::build`](crate::RouterBuilder::build).
//!
//! A caller-supplied `X-Request-ID` is kept, an absent or empty one is replaced
//! with a UUID v7, and the value is echoed on the response. Handlers read it by
//! taking a [`RequestId`] argument.
//!
//! [`MetricsLayer`] feeds three series, each prefixed with the namespace:
//! `http_requests_total{method,endpoint,status}`,
//! `http_request_duration_seconds{method,endpoint}` and the
//! `http_requests_in_flight` gauge.

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts, MatchedPath, Request};
use axum::http::{request::Parts, HeaderMap, HeaderValue, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use opentelemetry::trace::TraceContextExt;
use pin_project_lite::pin_project;
use tower::{Layer, Service};
use tracing::{info_span, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::problem::ProblemDetails;
use crate::telemetry::extract_trace_context;

/// Header carrying the request correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Endpoint label for requests that matched no route.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Correlation ID of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh UUID v7, sortable by creation time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(extract_or_generate_request_id(&parts.headers))
    }
}

/// The request's `X-Request-ID`, or a generated one when the header is
/// missing, empty or not valid UTF-8.
pub fn extract_or_generate_request_id(headers: &HeaderMap) -> RequestId {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(RequestId::from)
        .unwrap_or_else(RequestId::generate)
}

/// Generates UUID v7 request IDs for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV7;

impl tower_http::request_id::MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(
        &mut self,
        _request: &axum::http::Request<B>,
    ) -> Option<tower_http::request_id::RequestId> {
        HeaderValue::from_str(RequestId::generate().as_str())
            .ok()
            .map(tower_http::request_id::RequestId::new)
    }
}

/// Metric label for the route that handled `req`.
///
/// Uses the route template (e.g. `/users/{id}`) so labels stay bounded.
fn endpoint_label<B>(req: &axum::http::Request<B>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string())
}

/// Build the tracing span for one HTTP request.
///
/// A valid `traceparent` header makes the span a child of the caller's trace.
pub fn make_request_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    let span = info_span!(
        "http_request",
        otel.kind = "server",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    );
    span.set_parent(extract_trace_context(request.headers()));
    span
}

/// Tower layer for recording HTTP metrics into a [`Metrics`] handle.
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    metrics: Metrics,
}

impl MetricsLayer {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsMiddleware {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// Service produced by [`MetricsLayer`].
#[derive(Debug, Clone)]
pub struct MetricsMiddleware<S> {
    inner: S,
    metrics: Metrics,
}

impl<S, ReqBody, ResBody> Service<axum::http::Request<ReqBody>> for MetricsMiddleware<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: axum::http::Request<ReqBody>) -> Self::Future {
        let guard = InFlight {
            metrics: self.metrics.clone(),
            method: req.method().to_string(),
            endpoint: endpoint_label(&req),
            start: Instant::now(),
            finished: false,
        };
        self.metrics.request_started();

        MetricsFuture {
            inner: self.inner.call(req),
            guard,
        }
    }
}

/// Keeps the in-flight gauge balanced when a request future is dropped early.
struct InFlight {
    metrics: Metrics,
    method: String,
    endpoint: String,
    start: Instant,
    finished: bool,
}

impl InFlight {
    fn finish(&mut self, status: u16) {
        self.finished = true;
        self.metrics
            .request_finished(&self.method, &self.endpoint, status, self.start.elapsed());
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.request_abandoned();
        }
    }
}

pin_project! {
    /// Response future of [`MetricsMiddleware`].
    pub struct MetricsFuture<F> {
        #[pin]
        inner: F,
        guard: InFlight,
    }
}

impl<F, ResBody, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                let status = match &result {
                    Ok(response) => response.status().as_u16(),
                    Err(_) => 500,
                };
                this.guard.finish(status);
                Poll::Ready(result)
            }
        }
    }
}

/// Log one line per request once the response is ready.
///
/// Meant for `axum::middleware::from_fn`, inside the trace span layer so the
/// active OpenTelemetry trace ID can be included.
pub async fn log_requests(request: Request, next: Next) -> axum::response::Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let trace_id = current_trace_id().unwrap_or_else(|| "-".to_string());

    if response.status().is_server_error() {
        tracing::error!(
            %method, %path, status, duration_ms, %remote_addr, %user_agent, %request_id, %trace_id,
            "request failed"
        );
    } else {
        tracing::info!(
            %method, %path, status, duration_ms, %remote_addr, %user_agent, %request_id, %trace_id,
            "request completed"
        );
    }

    response
}

/// Trace ID of the current span, when it belongs to a valid trace.
fn current_trace_id() -> Option<String> {
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// Response for a panicking handler, for `CatchPanicLayer::custom`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };

    tracing::error!(panic = message, "handler panicked");

    ProblemDetails::internal_error("The server encountered an unexpected error").into_response()
}
