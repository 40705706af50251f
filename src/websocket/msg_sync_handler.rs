use axum::extract::ws::Message;
use tracing::{debug, warn};

use crate::websocket::handler::Outbox;
use crate::ws::connctx::ConnCtx;
use crate::ws::protocol::SyncMessage;
use crate::ws::room::Room;

/// Handle a sync message - apply updates, answer state vectors
pub async fn handle_sync_message(msg: SyncMessage, room: &Room, ctx: &ConnCtx, outbox: &Outbox) {
    let kind = match &msg {
        SyncMessage::Step1(_) => "step1",
        SyncMessage::Step2(_) => "step2",
        SyncMessage::Update(_) => "update",
    };

    match room.apply_sync(ctx.id, msg).await {
        Ok(Some(reply)) => {
            if outbox.send(Message::Binary(reply)).await.is_err() {
                debug!("Connection {} closed before sync reply in room {}", ctx.id, ctx.room_id);
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Dropping sync {} from {} in room {}: {}", kind, ctx.id, ctx.room_id, e);
        }
    }
}
