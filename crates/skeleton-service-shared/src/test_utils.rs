//! Fixtures for driving routers in tests without binding a socket.
//!
//! Available to other crates through the `test-utils` feature.

use crate::config::ServiceConfig;
use crate::metrics::{Metrics, MetricsConfig};
use crate::state::AppState;
use tokio_util::sync::CancellationToken;

/// Configuration used by [`test_state`].
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.server.service_name = "test-service".to_string();
    config.server.service_version = "0.0.0-test".to_string();
    config.server.environment = "test".to_string();
    config.metrics.namespace = "test".to_string();
    config
}

/// Fresh state with its own metrics registry and termination token.
///
/// Every call returns independent state, so tests never observe each other's
/// metrics or shutdown.
///
/// # Panics
///
/// Panics if the metrics recorder cannot be built.
pub fn test_state() -> AppState {
    test_state_with(test_config())
}

/// Like [`test_state`], with a caller-supplied configuration.
pub fn test_state_with(config: ServiceConfig) -> AppState {
    let metrics = Metrics::new(&config.metrics).expect("failed to build test metrics registry");
    AppState::new(config, metrics, CancellationToken::new())
}

/// Configuration with metrics turned off.
pub fn metrics_disabled_config() -> ServiceConfig {
    let mut config = test_config();
    config.metrics = MetricsConfig {
        enabled: false,
        ..config.metrics
    };
    config
}

/// A request ID that is easy to spot in test output.
pub fn test_request_id() -> String {
    format!("test-{}", uuid::Uuid::now_v7())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_independent() {
        let first = test_state();
        let second = test_state();

        first.termination().cancel();
        assert!(first.is_shutting_down());
        assert!(!second.is_shutting_down());
    }

    #[test]
    fn test_metrics_disabled_config() {
        let state = test_state_with(metrics_disabled_config());
        assert!(!state.metrics().is_enabled());
    }

    #[test]
    fn test_request_ids_are_prefixed_and_distinct() {
        let first = test_request_id();
        assert!(first.starts_with("test-"));
        assert_ne!(first, test_request_id());
    }
}
