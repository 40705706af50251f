use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use super::awareness::{Awareness, AwarenessChange, AwarenessEntry};
use super::protocol::{
    decode_awareness_update, encode_awareness_update, ProtocolError, ProtocolMessage, SyncMessage,
};
use super::ydoc::{DocumentError, ReplicatedDocument};

/// A frame fanned out to every connection of a room except its sender.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub sender_id: Uuid,
    pub content: Arc<Vec<u8>>,
}

/// What a connection needs right after joining: its subscription and the
/// frames that must precede anything read from it.
pub struct Attachment {
    pub receiver: broadcast::Receiver<BroadcastMessage>,
    pub handshake: Vec<Vec<u8>>,
}

struct RoomState {
    doc: ReplicatedDocument,
    awareness: Awareness,
    /// Connection id to the awareness client ids it has announced
    connections: HashMap<Uuid, HashSet<u64>>,
}

/// One collaboration session: a document, its presence and its peers.
pub struct Room {
    id: String,
    state: Mutex<RoomState>,
    bc: broadcast::Sender<BroadcastMessage>,
}

impl Room {
    pub fn new(id: impl Into<String>, broadcast_capacity: usize) -> Self {
        let (bc, _rx) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            id: id.into(),
            state: Mutex::new(RoomState {
                doc: ReplicatedDocument::new(),
                awareness: Awareness::new(),
                connections: HashMap::new(),
            }),
            bc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a connection and build its initial sync frames.
    ///
    /// Subscribing and snapshotting happen under the room lock, so every
    /// update the connection later receives is newer than its snapshot.
    pub async fn attach(&self, connection_id: Uuid, seed: Option<&str>) -> Attachment {
        let mut state = self.state.lock().await;

        if let Some(update) = seed.and_then(|content| state.doc.seed_if_empty(content)) {
            self.broadcast(Uuid::nil(), ProtocolMessage::Sync(SyncMessage::Update(update)).encode());
        }

        state.connections.insert(connection_id, HashSet::new());
        let receiver = self.bc.subscribe();

        let mut handshake = vec![
            ProtocolMessage::Sync(SyncMessage::Step1(state.doc.encode_state_vector())).encode(),
            ProtocolMessage::Sync(SyncMessage::Step2(state.doc.encode_state_as_update())).encode(),
        ];
        if !state.awareness.is_empty() {
            let records = state.awareness.records();
            handshake.push(ProtocolMessage::Awareness(encode_awareness_update(&records)).encode());
        }

        Attachment { receiver, handshake }
    }

    /// Unregister a connection, drop the presence it announced and tell the
    /// remaining peers. Returns how many connections are left.
    pub async fn detach(&self, connection_id: Uuid) -> usize {
        let mut state = self.state.lock().await;
        let controlled = state.connections.remove(&connection_id).unwrap_or_default();

        let removed = state.awareness.remove_states(&controlled);
        if !removed.is_empty() {
            debug!(
                "Removed {} awareness states of connection {} in room {}",
                removed.len(),
                connection_id,
                self.id
            );
            let frame = ProtocolMessage::Awareness(encode_awareness_update(&removed)).encode();
            self.broadcast(connection_id, frame);
        }

        state.connections.len()
    }

    /// Handle a sync message from `origin`. Returns the reply for the
    /// sender, if the message asks for one.
    pub async fn apply_sync(
        &self,
        origin: Uuid,
        msg: SyncMessage,
    ) -> Result<Option<Vec<u8>>, DocumentError> {
        let state = self.state.lock().await;
        match msg {
            SyncMessage::Step1(sv) => {
                let diff = state.doc.encode_diff(&sv)?;
                Ok(Some(ProtocolMessage::Sync(SyncMessage::Step2(diff)).encode()))
            }
            SyncMessage::Step2(update) | SyncMessage::Update(update) => {
                state.doc.apply_update(&update)?;
                self.broadcast(origin, ProtocolMessage::Sync(SyncMessage::Update(update)).encode());
                Ok(None)
            }
        }
    }

    /// Merge an awareness update from `origin` and relay it unchanged.
    pub async fn apply_awareness(
        &self,
        origin: Uuid,
        payload: Vec<u8>,
    ) -> Result<AwarenessChange, ProtocolError> {
        let records = decode_awareness_update(&payload)?;
        let mut state = self.state.lock().await;
        let change = state.awareness.apply(&records);

        if let Some(controlled) = state.connections.get_mut(&origin) {
            for record in &records {
                match record.state {
                    Some(_) => controlled.insert(record.client_id),
                    None => controlled.remove(&record.client_id),
                };
            }
        } else {
            warn!("Awareness update from unknown connection {} in room {}", origin, self.id);
        }

        self.broadcast(origin, ProtocolMessage::Awareness(payload).encode());
        Ok(change)
    }

    /// All current presence states as one awareness frame.
    pub async fn awareness_frame(&self) -> Vec<u8> {
        let state = self.state.lock().await;
        ProtocolMessage::Awareness(encode_awareness_update(&state.awareness.records())).encode()
    }

    /// Presence of everyone but the given connection.
    pub async fn peers_of(&self, connection_id: Uuid) -> Vec<AwarenessEntry> {
        let state = self.state.lock().await;
        let own = state.connections.get(&connection_id).cloned().unwrap_or_default();
        state.awareness.peers(&own)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn text(&self) -> String {
        self.state.lock().await.doc.text()
    }

    pub async fn output_map(&self) -> std::collections::BTreeMap<String, Value> {
        self.state.lock().await.doc.output_map()
    }

    /// Every frame relayed in this room from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.bc.subscribe()
    }

    /// Presence change events of this room.
    pub async fn on_awareness_change(&self) -> broadcast::Receiver<AwarenessChange> {
        self.state.lock().await.awareness.on_change()
    }

    fn broadcast(&self, sender_id: Uuid, content: Vec<u8>) {
        // Err only means nobody is subscribed.
        let _ = self.bc.send(BroadcastMessage {
            sender_id,
            content: Arc::new(content),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::AwarenessRecord;
    use crate::ws::ydoc::tests::{client_apply, client_insert, client_text};
    use serde_json::json;
    use yrs::Doc;

    fn decode(frame: &[u8]) -> ProtocolMessage {
        ProtocolMessage::decode(frame).unwrap()
    }

    fn presence(client_id: u64, clock: u32, name: &str) -> Vec<u8> {
        encode_awareness_update(&[AwarenessRecord {
            client_id,
            clock,
            state: Some(json!({"user": {"name": name, "color": "#2ecc71"}})),
        }])
    }

    #[tokio::test]
    async fn handshake_is_step1_then_full_state() {
        let room = Room::new("abc", 16);
        room.apply_sync(Uuid::new_v4(), SyncMessage::Update(client_insert(&Doc::new(), 0, "print(1)")))
            .await
            .unwrap();

        let attachment = room.attach(Uuid::new_v4(), None).await;
        assert_eq!(attachment.handshake.len(), 2);
        assert!(matches!(decode(&attachment.handshake[0]), ProtocolMessage::Sync(SyncMessage::Step1(_))));

        let ProtocolMessage::Sync(SyncMessage::Step2(update)) = decode(&attachment.handshake[1]) else {
            panic!("expected step2");
        };
        let replica = Doc::new();
        client_apply(&replica, &update);
        assert_eq!(client_text(&replica), "print(1)");
    }

    #[tokio::test]
    async fn updates_after_attach_reach_subscriber_but_carry_sender() {
        let room = Room::new("abc", 16);
        let writer = Uuid::new_v4();
        room.attach(writer, None).await;
        let mut reader = room.attach(Uuid::new_v4(), None).await.receiver;

        room.apply_sync(writer, SyncMessage::Step2(client_insert(&Doc::new(), 0, "x")))
            .await
            .unwrap();

        let msg = reader.recv().await.unwrap();
        assert_eq!(msg.sender_id, writer);
        assert!(matches!(decode(&msg.content), ProtocolMessage::Sync(SyncMessage::Update(_))));
        assert_eq!(room.text().await, "x");
    }

    #[tokio::test]
    async fn step1_is_answered_with_the_missing_diff() {
        let room = Room::new("abc", 16);
        room.apply_sync(Uuid::new_v4(), SyncMessage::Update(client_insert(&Doc::new(), 0, "hello")))
            .await
            .unwrap();

        let client = Doc::new();
        let sv = yrs::ReadTxn::state_vector(&yrs::Transact::transact(&client));
        let sv = yrs::updates::encoder::Encode::encode_v1(&sv);
        let reply = room.apply_sync(Uuid::new_v4(), SyncMessage::Step1(sv)).await.unwrap().unwrap();

        let ProtocolMessage::Sync(SyncMessage::Step2(diff)) = decode(&reply) else {
            panic!("expected step2");
        };
        client_apply(&client, &diff);
        assert_eq!(client_text(&client), "hello");
    }

    #[tokio::test]
    async fn corrupt_updates_leave_the_document_untouched() {
        let room = Room::new("abc", 16);
        let mut rx = room.subscribe();
        assert!(room.apply_sync(Uuid::new_v4(), SyncMessage::Update(vec![1, 2, 3])).await.is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(room.text().await, "");
    }

    #[tokio::test]
    async fn detach_removes_presence_of_that_connection_only() {
        let room = Room::new("abc", 16);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        room.attach(a, None).await;
        room.attach(b, None).await;
        room.apply_awareness(a, presence(11, 0, "ada")).await.unwrap();
        room.apply_awareness(b, presence(22, 0, "bob")).await.unwrap();
        assert_eq!(room.peers_of(b).await.len(), 1);

        let mut changes = room.on_awareness_change().await;
        let mut relay = room.subscribe();
        assert_eq!(room.detach(a).await, 1);

        let change = changes.recv().await.unwrap();
        assert_eq!(change.removed, vec![11]);
        assert!(changes.try_recv().is_err());

        let removal = relay.recv().await.unwrap();
        let ProtocolMessage::Awareness(payload) = decode(&removal.content) else {
            panic!("expected awareness");
        };
        let records = decode_awareness_update(&payload).unwrap();
        assert_eq!(records[0].client_id, 11);
        assert!(records[0].state.is_none());

        let peers = room.peers_of(a).await;
        assert_eq!(peers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["bob"]);
    }

    #[tokio::test]
    async fn late_joiners_receive_current_presence() {
        let room = Room::new("abc", 16);
        let a = Uuid::new_v4();
        room.attach(a, None).await;
        room.apply_awareness(a, presence(11, 0, "ada")).await.unwrap();

        let attachment = room.attach(Uuid::new_v4(), None).await;
        assert_eq!(attachment.handshake.len(), 3);
        assert!(matches!(decode(&attachment.handshake[2]), ProtocolMessage::Awareness(_)));
    }

    #[tokio::test]
    async fn seeding_runs_once_per_room() {
        let room = Room::new("abc", 16);
        room.attach(Uuid::new_v4(), Some("print('hello')\n")).await;
        room.attach(Uuid::new_v4(), Some("print('hello')\n")).await;
        assert_eq!(room.text().await, "print('hello')\n");
        assert_eq!(room.connection_count().await, 2);
    }
}
