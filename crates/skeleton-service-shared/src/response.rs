//! JSON envelope for handler results.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// JSON body for a successful response.
///
/// The payload's fields are written at the top level of the JSON object. A
/// request ID can be attached so clients can quote it when reporting issues,
/// mirroring the `instance` field of `ProblemDetails`.
///
/// # Example
///
/// ```
/// use axum::http::StatusCode;
/// use skeleton_service_shared::ServiceResponse;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Created {
///     id: u64,
/// }
///
/// let response = ServiceResponse::new(Created { id: 7 })
///     .with_status(StatusCode::CREATED)
///     .with_request_id("req-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    #[serde(flatten)]
    pub data: T,

    /// Correlation ID of the request that produced this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(skip)]
    status: Option<u16>,
}

impl<T> ServiceResponse<T> {
    /// Wrap `data` in a 200 OK response.
    pub fn new(data: T) -> Self {
        Self {
            data,
            request_id: None,
            status: None,
        }
    }

    /// Use a status code other than 200.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self
    }

    /// Attach the request correlation ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Status code the response will be sent with.
    pub fn status(&self) -> StatusCode {
        self.status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::OK)
    }
}

impl<T> From<T> for ServiceResponse<T> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: Serialize> IntoResponse for ServiceResponse<T> {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
