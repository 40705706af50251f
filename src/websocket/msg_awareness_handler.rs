use axum::extract::ws::Message;
use tracing::{debug, warn};

use crate::websocket::handler::Outbox;
use crate::ws::connctx::ConnCtx;
use crate::ws::room::Room;

/// Handle an awareness update - merge it into the room and relay it
pub async fn handle_awareness_message(payload: Vec<u8>, room: &Room, ctx: &ConnCtx) {
    match room.apply_awareness(ctx.id, payload).await {
        Ok(change) if !change.is_empty() => {
            let peers = room.peers_of(ctx.id).await;
            debug!(
                "Awareness in room {}: +{:?} ~{:?} -{:?}, peers of {}: {:?}",
                ctx.room_id,
                change.added,
                change.updated,
                change.removed,
                ctx.id,
                peers
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Dropping awareness update from {} in room {}: {}", ctx.id, ctx.room_id, e);
        }
    }
}

/// Handle a query-awareness message - reply with every known state
pub async fn handle_query_awareness_message(room: &Room, ctx: &ConnCtx, outbox: &Outbox) {
    let frame = room.awareness_frame().await;
    if outbox.send(Message::Binary(frame)).await.is_err() {
        debug!("Connection {} closed before awareness reply in room {}", ctx.id, ctx.room_id);
    }
}
