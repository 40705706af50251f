use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::models::{ExecuteRequest, ExecutionResult, SendMessage};
use crate::services::execution_service::ExecutionService;
use crate::websocket::handler::Outbox;
use crate::ws::connctx::ConnCtx;

/// Handle an execute request without holding up the connection's pump.
///
/// The result goes to the requesting connection only. If it has closed by
/// then, the result is dropped. A run holds one of the connection's `runs`
/// permits until it finishes; with none left the request is answered with
/// a Queue Full result right away.
pub async fn handle_execute_message(
    req: ExecuteRequest,
    ctx: &ConnCtx,
    outbox: &Outbox,
    execution: &ExecutionService,
    runs: &Arc<Semaphore>,
) {
    let permit = match runs.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Execute request from {} in room {} rejected, too many runs in flight", ctx.id, ctx.room_id);
            let result = ExecutionResult::queue_full("too many executions in flight for this connection");
            send_result(result, outbox, ctx.id, &ctx.room_id).await;
            return;
        }
    };
    info!("Execute request from {} in room {}", ctx.id, ctx.room_id);

    let execution = execution.clone();
    let outbox = outbox.clone();
    let connection_id = ctx.id;
    let room_id = ctx.room_id.clone();
    tokio::spawn(async move {
        let result = execution.execute(req).await;
        drop(permit);
        send_result(result, &outbox, connection_id, &room_id).await;
    });
}

/// Reply to a control frame that names a known type but cannot be decoded.
pub async fn handle_malformed_message(kind: &str, reason: &str, ctx: &ConnCtx, outbox: &Outbox) {
    info!("Malformed {} frame from {} in room {}: {}", kind, ctx.id, ctx.room_id, reason);
    let result = ExecutionResult::runtime_error(format!("invalid {} request: {}", kind, reason));
    send_result(result, outbox, ctx.id, &ctx.room_id).await;
}

async fn send_result(result: ExecutionResult, outbox: &Outbox, connection_id: uuid::Uuid, room_id: &str) {
    let msg = match serde_json::to_string(&SendMessage::ExecutionResult(result)) {
        Ok(msg) => msg,
        Err(e) => {
            error!("Failed to encode execution result for {}: {}", connection_id, e);
            return;
        }
    };
    if outbox.send(Message::Text(msg)).await.is_err() {
        debug!("Connection {} in room {} closed, dropping execution result", connection_id, room_id);
    }
}
