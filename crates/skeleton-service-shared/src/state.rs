//! State handed to every handler through axum's `State` extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::metrics::Metrics;

/// Configuration, metrics and the termination token, behind one `Arc`.
///
/// Handlers that need to react to shutdown should check
/// [`AppState::is_shutting_down`] or wait on [`AppState::termination`] rather
/// than holding their own token.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    metrics: Metrics,
    termination: CancellationToken,
    started_at: Instant,
}

impl AppState {
    /// Build state for a service that stops when `termination` is cancelled.
    pub fn new(config: ServiceConfig, metrics: Metrics, termination: CancellationToken) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                metrics,
                termination,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Cancelled when shutdown starts.
    pub fn termination(&self) -> &CancellationToken {
        &self.inner.termination
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.termination.is_cancelled()
    }

    /// Measured from [`AppState::new`].
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.inner.config.server.service_name)
            .field("metrics", &self.inner.metrics)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
