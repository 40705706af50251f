use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Run code through the execution service
#[utoipa::path(
    post,
    path = "/execute",
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "Run finished, failed or timed out; tagged with type execution-result", body = ExecutionResult),
        (status = 400, description = "source_code or language_id missing", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn execute_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        execute_doc,
    ),
    components(
        schemas(HealthResponse, ErrorResponse, ExecuteRequest, ExecutionResult, ExecutionStatus, LanguageId)
    ),
    tags(
        (name = "api", description = "Control plane endpoints")
    )
)]
pub struct ApiDoc;
