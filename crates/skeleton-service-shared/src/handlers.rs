//! Built-in informational endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Body of `GET /ping`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pong {
    pub message: String,
}

/// Reachability check that touches nothing but the router.
pub async fn ping() -> Json<Pong> {
    Json(Pong {
        message: "pong".to_string(),
    })
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    pub shutting_down: bool,
}

/// Service identity and runtime state.
pub async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    let server = &state.config().server;
    Json(ServiceStatus {
        service: server.service_name.clone(),
        version: server.service_version.clone(),
        environment: server.environment.clone(),
        uptime_seconds: state.uptime().as_secs(),
        shutting_down: state.is_shutting_down(),
    })
}
