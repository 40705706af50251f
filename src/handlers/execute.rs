use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{ErrorResponse, ExecuteRequest, SendMessage};
use crate::AppState;

/// Run code through the execution service outside of a room.
///
/// Invalid requests are rejected with 400. Everything past validation,
/// upstream failures and timeouts included, is reported in the result,
/// framed exactly like the `execution-result` socket message.
pub async fn execute(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<SendMessage>, (StatusCode, Json<ErrorResponse>)> {
    let runner_req = match app_state.execution.validate(req) {
        Ok(runner_req) => runner_req,
        Err(e) => {
            warn!("Rejected execute request: {}", e);
            return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(StatusCode::BAD_REQUEST, e.to_string()))));
        }
    };

    info!("Execute request over HTTP language={}", runner_req.language_id);
    let result = app_state.execution.run(runner_req).await;
    Ok(Json(SendMessage::ExecutionResult(result)))
}
