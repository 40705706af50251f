use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::room::{Attachment, Room};

/// Process-wide table of live rooms.
///
/// Rooms are created on first join and evicted when their last connection
/// leaves. Join and leave both run under the table's write lock, so a room
/// cannot be evicted while someone is joining it.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    broadcast_capacity: usize,
    seed_content: Option<String>,
}

impl RoomRegistry {
    pub fn new(broadcast_capacity: usize, seed_content: Option<String>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            broadcast_capacity,
            seed_content,
        }
    }

    pub async fn get_or_create_room(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        Self::entry(&mut rooms, room_id, self.broadcast_capacity)
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Attach a connection to the room, creating the room if needed.
    pub async fn join(&self, room_id: &str, connection_id: Uuid) -> (Arc<Room>, Attachment) {
        let mut rooms = self.rooms.write().await;
        let room = Self::entry(&mut rooms, room_id, self.broadcast_capacity);
        let attachment = room.attach(connection_id, self.seed_content.as_deref()).await;
        (room, attachment)
    }

    /// Detach a connection and evict its room if it was the last one.
    pub async fn leave(&self, room: &Arc<Room>, connection_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let remaining = room.detach(connection_id).await;
        if remaining == 0 {
            Self::evict(&mut rooms, room);
        }
    }

    /// Evict the room if nobody is connected to it.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            return false;
        };
        if room.connection_count().await > 0 {
            return false;
        }
        Self::evict(&mut rooms, &room)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Open connections across all rooms.
    pub async fn connection_count(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut total = 0;
        for room in rooms {
            total += room.connection_count().await;
        }
        total
    }

    fn entry(rooms: &mut HashMap<String, Arc<Room>>, room_id: &str, capacity: usize) -> Arc<Room> {
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!("Creating room {}", room_id);
                Arc::new(Room::new(room_id, capacity))
            })
            .clone()
    }

    fn evict(rooms: &mut HashMap<String, Arc<Room>>, room: &Arc<Room>) -> bool {
        match rooms.get(room.id()) {
            Some(current) if Arc::ptr_eq(current, room) => {
                rooms.remove(room.id());
                info!("Room {} is empty, removing it", room.id());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::SyncMessage;
    use crate::ws::ydoc::tests::client_insert;
    use yrs::Doc;

    #[tokio::test]
    async fn same_id_yields_same_room() {
        let registry = RoomRegistry::new(16, None);
        let a = registry.get_or_create_room("abc").await;
        let b = registry.get_or_create_room("abc").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_joins_share_one_room() {
        let registry = Arc::new(RoomRegistry::new(16, None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.join("abc", Uuid::new_v4()).await.0 })
            })
            .collect();

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }
        assert!(rooms.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.connection_count().await, 8);
    }

    #[tokio::test]
    async fn last_leave_evicts_the_room() {
        let registry = RoomRegistry::new(16, None);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (room, _) = registry.join("abc", a).await;
        registry.join("abc", b).await;

        registry.leave(&room, a).await;
        assert_eq!(registry.room_count().await, 1);
        registry.leave(&room, b).await;
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.get("abc").await.is_none());
    }

    #[tokio::test]
    async fn remove_if_empty_keeps_occupied_rooms() {
        let registry = RoomRegistry::new(16, None);
        registry.join("busy", Uuid::new_v4()).await;
        registry.get_or_create_room("idle").await;

        assert!(!registry.remove_if_empty("busy").await);
        assert!(registry.remove_if_empty("idle").await);
        assert!(!registry.remove_if_empty("missing").await);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let registry = RoomRegistry::new(16, None);
        let (a, _) = registry.join("a", Uuid::new_v4()).await;
        let (b, mut b_attachment) = registry.join("b", Uuid::new_v4()).await;

        a.apply_sync(Uuid::new_v4(), SyncMessage::Update(client_insert(&Doc::new(), 0, "secret")))
            .await
            .unwrap();

        assert_eq!(a.text().await, "secret");
        assert_eq!(b.text().await, "");
        assert!(b_attachment.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejoining_after_eviction_starts_fresh() {
        let registry = RoomRegistry::new(16, None);
        let id = Uuid::new_v4();
        let (room, _) = registry.join("abc", id).await;
        room.apply_sync(id, SyncMessage::Update(client_insert(&Doc::new(), 0, "old")))
            .await
            .unwrap();
        registry.leave(&room, id).await;

        let (fresh, _) = registry.join("abc", Uuid::new_v4()).await;
        assert!(!Arc::ptr_eq(&room, &fresh));
        assert_eq!(fresh.text().await, "");
    }
}
