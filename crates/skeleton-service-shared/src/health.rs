//! Liveness and readiness probes.
//!
//! Liveness stays green for as long as the process can answer. Readiness turns
//! 503 as soon as the termination token is cancelled so orchestrators pull the
//! instance out of rotation while in-flight requests drain.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Body of every probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `ok` or `not_ready`.
    pub status: String,
    pub service: String,
    pub version: String,
    /// UTC, second precision.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HealthStatus {
    pub fn alive(service: &str, version: &str) -> Self {
        Self {
            status: "ok".to_string(),
            service: service.to_string(),
            version: version.to_string(),
            timestamp: now_rfc3339(),
            reason: None,
        }
    }

    pub fn not_ready(service: &str, version: &str, reason: &str) -> Self {
        Self {
            status: "not_ready".to_string(),
            service: service.to_string(),
            version: version.to_string(),
            timestamp: now_rfc3339(),
            reason: Some(reason.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `GET /health`, `GET /health/live`. Always 200, draining included.
///
/// ```text
/// GET /health/live
/// {"status":"ok","service":"service-skeleton","version":"0.1.0","timestamp":"2026-01-30T10:00:00Z"}
/// ```
pub async fn health_live(State(state): State<AppState>) -> impl IntoResponse {
    let server = &state.config().server;
    let status = HealthStatus::alive(&server.service_name, &server.service_version);
    (StatusCode::OK, Json(status))
}

/// `GET /health/ready`. 200 while accepting traffic, 503 `not_ready` once
/// shutdown has begun.
pub async fn health_ready(State(state): State<AppState>) -> Response {
    let server = &state.config().server;

    if state.is_shutting_down() {
        let status = HealthStatus::not_ready(
            &server.service_name,
            &server.service_version,
            "shutting down",
        );
        return (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response();
    }

    let status = HealthStatus::alive(&server.service_name, &server.service_version);
    (StatusCode::OK, Json(status)).into_response()
}
