//! Example API group mounted under `/api/v1`.

use axum::{extract::Query, routing::get, Router};
use serde::{Deserialize, Serialize};

use skeleton_service_shared::{
    require_non_blank, AppState, ProblemDetails, RequestId, RouteRegistrar, ServiceResponse,
    Validate,
};

/// Path prefix for this API version.
pub const API_PREFIX: &str = "/api/v1";

/// Query parameters of `GET /api/v1/example`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExampleParams {
    pub name: Option<String>,
}

impl Validate for ExampleParams {
    fn validate(&self) -> Result<(), Box<ProblemDetails>> {
        require_non_blank("name", self.name.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExampleResponse {
    pub message: String,
}

/// Routes of the example API.
pub struct ExampleApi;

impl RouteRegistrar for ExampleApi {
    fn register_routes(&self, router: Router<AppState>) -> Router<AppState> {
        router.nest(
            API_PREFIX,
            Router::new().route("/example", get(get_example)),
        )
    }
}

/// Handle `GET /api/v1/example?name=<name>`.
async fn get_example(
    request_id: RequestId,
    Query(params): Query<ExampleParams>,
) -> Result<ServiceResponse<ExampleResponse>, ProblemDetails> {
    if let Err(problem) = params.validate() {
        tracing::debug!(request_id = %request_id, "rejected example request");
        return Err((*problem).with_request_id(request_id.as_str()));
    }

    let name = params.name.unwrap_or_default();
    Ok(ServiceResponse::new(ExampleResponse {
        message: format!("Hello, {}!", name.trim()),
    }))
}
