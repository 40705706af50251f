use std::sync::Arc;

use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    http::Uri,
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::services::execution_service::ExecutionService;
use crate::websocket::frame::{classify, ControlFrame, Frame};
use crate::websocket::msg_awareness_handler::{handle_awareness_message, handle_query_awareness_message};
use crate::websocket::msg_execute_handler::{handle_execute_message, handle_malformed_message};
use crate::websocket::msg_sync_handler::handle_sync_message;
use crate::ws::connctx::{CloseReason, ConnCtx, ConnState};
use crate::ws::membership::Membership;
use crate::ws::protocol::ProtocolMessage;
use crate::ws::room::{BroadcastMessage, Room};
use crate::models::ReceivedMessage;
use crate::AppState;

/// Frames queued for one connection's socket, next to the room broadcast.
pub type Outbox = mpsc::Sender<Message>;

const OUTBOX_CAPACITY: usize = 64;

/// WebSocket handler. Any path upgrades; the path names the room.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    let room_id = app_state.config.room_id_from_path(uri.path());
    debug!("New WebSocket connection attempt for room {}", room_id);
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: String, app_state: Arc<AppState>) {
    let mut ctx = ConnCtx::new(room_id);
    let (membership, attachment) = Membership::enter(&app_state.registry, &ctx.room_id, ctx.id).await;
    info!("WebSocket connection {} joined room {}", ctx.id, ctx.room_id);

    let (mut sender, mut receiver) = socket.split();

    // The snapshot goes out before any relayed frame.
    ctx.advance(ConnState::Syncing);
    for frame in attachment.handshake {
        if let Err(e) = sender.send(Message::Binary(frame)).await {
            warn!("Connection {} in room {} failed during sync: {}", ctx.id, ctx.room_id, e);
            ctx.advance(ConnState::Closed);
            return;
        }
    }
    ctx.advance(ConnState::Active);

    let (outbox, outbox_rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
    let mut send_task = tokio::spawn(pump_outgoing(
        sender,
        outbox_rx,
        attachment.receiver,
        ctx.clone(),
    ));

    let room = membership.room().clone();
    let execution = app_state.execution.clone();
    let runs = Arc::new(Semaphore::new(app_state.config.max_runs_per_connection));
    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let payload = match msg {
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Close(_)) => return CloseReason::Graceful,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => return CloseReason::Error(e.to_string()),
            };
            dispatch(payload, &room, &recv_ctx, &outbox, &execution, &runs).await;
        }
        CloseReason::Graceful
    });

    // Wait for either task to finish (and finish the other)
    let reason = tokio::select! {
        res = &mut send_task => { recv_task.abort(); res }
        res = &mut recv_task => { send_task.abort(); res }
    }
    .unwrap_or_else(|e| CloseReason::Error(format!("connection task failed: {}", e)));

    ctx.advance(ConnState::Closed);
    match reason {
        CloseReason::Graceful => info!(
            "WebSocket connection {} closed in room {} after {}s",
            ctx.id,
            ctx.room_id,
            ctx.session_secs()
        ),
        CloseReason::Error(e) => warn!(
            "WebSocket connection {} in room {} closed with error after {}s: {}",
            ctx.id,
            ctx.room_id,
            ctx.session_secs(),
            e
        ),
    }
    drop(membership);
}

/// Write direct replies and room broadcasts to the socket.
///
/// Frames from this connection itself are skipped. A lagging subscriber is
/// closed so its client reconnects and resyncs.
async fn pump_outgoing(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<Message>,
    mut rbc: broadcast::Receiver<BroadcastMessage>,
    ctx: ConnCtx,
) -> CloseReason {
    loop {
        let msg = tokio::select! {
            biased;
            direct = outbox.recv() => match direct {
                Some(msg) => msg,
                None => return CloseReason::Graceful,
            },
            relayed = rbc.recv() => match relayed {
                Ok(broadcast_msg) if broadcast_msg.sender_id == ctx.id => continue,
                Ok(broadcast_msg) => Message::Binary(broadcast_msg.content.as_ref().clone()),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return CloseReason::Error(format!("lagged behind room broadcast by {} frames", n));
                }
                Err(broadcast::error::RecvError::Closed) => return CloseReason::Graceful,
            },
        };

        if let Err(e) = sender.send(msg).await {
            return CloseReason::Error(e.to_string());
        }
    }
}

/// Route one inbound frame to its handler.
async fn dispatch(
    payload: Vec<u8>,
    room: &Room,
    ctx: &ConnCtx,
    outbox: &Outbox,
    execution: &ExecutionService,
    runs: &Arc<Semaphore>,
) {
    match classify(payload) {
        Frame::Control(ControlFrame::Message(ReceivedMessage::Execute(req))) => {
            handle_execute_message(req, ctx, outbox, execution, runs).await;
        }
        Frame::Control(ControlFrame::Malformed { kind, reason }) => {
            handle_malformed_message(&kind, &reason, ctx, outbox).await;
        }
        Frame::Replication(bytes) => match ProtocolMessage::decode(&bytes) {
            Ok(ProtocolMessage::Sync(msg)) => handle_sync_message(msg, room, ctx, outbox).await,
            Ok(ProtocolMessage::Awareness(update)) => handle_awareness_message(update, room, ctx).await,
            Ok(ProtocolMessage::QueryAwareness) => handle_query_awareness_message(room, ctx, outbox).await,
            Ok(ProtocolMessage::Auth) => {
                debug!("Ignoring auth message from {} in room {}", ctx.id, ctx.room_id);
            }
            Err(e) => {
                warn!("Dropping undecodable frame from {} in room {}: {}", ctx.id, ctx.room_id, e);
            }
        },
    }
}
