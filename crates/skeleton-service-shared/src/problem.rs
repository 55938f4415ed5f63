//! Error bodies in the RFC 9457 `application/problem+json` format.
//!
//! Every error the skeleton produces itself (unknown path, handler panic,
//! invalid parameters) uses [`ProblemDetails`], and services are expected to
//! do the same. <https://www.rfc-editor.org/rfc/rfc9457.html>

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Media type of problem responses.
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Type URI for rejected request parameters.
pub const PROBLEM_INVALID_REQUEST: &str = "/problems/invalid-request";

/// Type URI for paths with no route.
pub const PROBLEM_NOT_FOUND: &str = "/problems/not-found";

/// Type URI for requests that exceeded the server's time budget.
pub const PROBLEM_REQUEST_TIMEOUT: &str = "/problems/request-timeout";

/// Type URI for unexpected server failures.
pub const PROBLEM_INTERNAL_ERROR: &str = "/problems/internal-error";

/// Type URI used while the service cannot take traffic (e.g., shutting down).
pub const PROBLEM_SERVICE_UNAVAILABLE: &str = "/problems/service-unavailable";

/// A problem details document.
///
/// `status` mirrors the HTTP status of the response carrying it and
/// `instance` holds the request ID when one is known.
///
/// # Example
///
/// ```
/// use skeleton_service_shared::ProblemDetails;
///
/// let problem = ProblemDetails::bad_request("query parameter 'name' is required")
///     .with_request_id("0190b3c4-7d7e-7c2a-9b1e-3f4a5b6c7d8e");
/// assert_eq!(problem.status, 400);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_uri: String,

    pub title: String,

    pub status: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(type_uri: impl Into<String>, title: impl Into<String>, status: StatusCode) -> Self {
        Self {
            type_uri: type_uri.into(),
            title: title.into(),
            status: status.as_u16(),
            detail: None,
            instance: None,
        }
    }

    /// Set the occurrence-specific explanation.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set `instance` to the request's correlation ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.instance = Some(request_id.into());
        self
    }

    /// 400 for parameters that failed validation.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_INVALID_REQUEST,
            "Invalid Request",
            StatusCode::BAD_REQUEST,
        )
        .with_detail(detail)
    }

    /// 404 for a path with no route.
    pub fn not_found(path: &str) -> Self {
        Self::new(PROBLEM_NOT_FOUND, "Not Found", StatusCode::NOT_FOUND)
            .with_detail(format!("No route matches '{}'", path))
    }

    /// 408 for a request that ran out of time.
    pub fn request_timeout() -> Self {
        Self::new(
            PROBLEM_REQUEST_TIMEOUT,
            "Request Timeout",
            StatusCode::REQUEST_TIMEOUT,
        )
    }

    /// 500 for failures the client cannot fix.
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_INTERNAL_ERROR,
            "Internal Error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .with_detail(detail)
    }

    /// 503 while the service cannot take traffic.
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_SERVICE_UNAVAILABLE,
            "Service Unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .with_detail(detail)
    }

    /// HTTP status for the response, 500 if `status` is not a valid code.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({}): {}", self.title, self.status, detail),
            None => write!(f, "{} ({})", self.title, self.status),
        }
    }
}

impl std::error::Error for ProblemDetails {}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE))],
            Json(self),
        )
            .into_response()
    }
}
