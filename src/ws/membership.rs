use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::registry::RoomRegistry;
use super::room::{Attachment, Room};

/// A connection's seat in a room.
///
/// Dropping it detaches the connection: its presence is removed, peers are
/// told, and the room is evicted if it became empty. This runs on every
/// exit path of the connection task, panics and aborts included.
pub struct Membership {
    registry: Arc<RoomRegistry>,
    room: Arc<Room>,
    connection_id: Uuid,
}

impl Membership {
    pub async fn enter(registry: &Arc<RoomRegistry>, room_id: &str, connection_id: Uuid) -> (Self, Attachment) {
        let (room, attachment) = registry.join(room_id, connection_id).await;
        let membership = Self {
            registry: registry.clone(),
            room,
            connection_id,
        };
        (membership, attachment)
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let room = self.room.clone();
        let connection_id = self.connection_id;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.leave(&room, connection_id).await;
                    debug!("Connection {} left room {}", connection_id, room.id());
                });
            }
            Err(_) => warn!(
                "No runtime to detach connection {} from room {}",
                connection_id,
                self.room.id()
            ),
        }
    }
}
