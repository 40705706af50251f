use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    /// Initial snapshot sent
    Syncing,
    Active,
    Closed,
}

/// How a connection ended. Both end in `Closed`, they are only logged differently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    Graceful,
    Error(String),
}

#[derive(Clone, Debug)]
pub struct ConnCtx {
    pub id: Uuid,
    pub room_id: String,
    pub connected_at: DateTime<Utc>,
    state: ConnState,
}

impl ConnCtx {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            connected_at: Utc::now(),
            state: ConnState::Connecting,
        }
    }

    /// Move to `next` if the transition is allowed. Closed is terminal.
    pub fn advance(&mut self, next: ConnState) -> bool {
        let allowed = matches!(
            (self.state, next),
            (ConnState::Connecting, ConnState::Syncing)
                | (ConnState::Syncing, ConnState::Active)
                | (ConnState::Connecting | ConnState::Syncing | ConnState::Active, ConnState::Closed)
        );
        if allowed {
            debug!(
                "Connection {} in room {}: {:?} -> {:?}",
                self.id, self.room_id, self.state, next
            );
            self.state = next;
        } else {
            warn!(
                "Connection {} in room {}: refusing {:?} -> {:?}",
                self.id, self.room_id, self.state, next
            );
        }
        allowed
    }

    pub fn session_secs(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds()
    }
}
