//! Binary envelope used by Yjs websocket providers.
//!
//! ```text
//! message   := varUint(kind) body
//! sync      := varUint(0|1|2) varBuf(state vector | update)
//! awareness := varBuf(varUint(n) { varUint(client) varUint(clock) varString(json) }*n)
//! ```

use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;

pub const MSG_SYNC: u32 = 0;
pub const MSG_AWARENESS: u32 = 1;
pub const MSG_AUTH: u32 = 2;
pub const MSG_QUERY_AWARENESS: u32 = 3;

pub const MSG_SYNC_STEP1: u32 = 0;
pub const MSG_SYNC_STEP2: u32 = 1;
pub const MSG_SYNC_UPDATE: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Encoded state vector of the sender
    Step1(Vec<u8>),
    /// Update answering a Step1
    Step2(Vec<u8>),
    Update(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Sync(SyncMessage),
    /// Raw awareness update payload, decoded with [`decode_awareness_update`]
    Awareness(Vec<u8>),
    Auth,
    QueryAwareness,
}

/// One entry of an awareness update. `state == None` marks removal.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessRecord {
    pub client_id: u64,
    pub clock: u32,
    pub state: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ProtocolError {
    Decode(yrs::encoding::read::Error),
    UnknownMessage(u32),
    UnknownSyncMessage(u32),
    InvalidAwarenessState(serde_json::Error),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Decode(e) => write!(f, "Failed to decode message: {}", e),
            ProtocolError::UnknownMessage(kind) => write!(f, "Unknown message type {}", kind),
            ProtocolError::UnknownSyncMessage(kind) => write!(f, "Unknown sync message type {}", kind),
            ProtocolError::InvalidAwarenessState(e) => write!(f, "Invalid awareness state: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<yrs::encoding::read::Error> for ProtocolError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        ProtocolError::Decode(e)
    }
}

impl ProtocolMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let kind: u32 = cursor.read_var()?;
        match kind {
            MSG_SYNC => {
                let sub: u32 = cursor.read_var()?;
                let payload = cursor.read_buf()?.to_vec();
                let msg = match sub {
                    MSG_SYNC_STEP1 => SyncMessage::Step1(payload),
                    MSG_SYNC_STEP2 => SyncMessage::Step2(payload),
                    MSG_SYNC_UPDATE => SyncMessage::Update(payload),
                    other => return Err(ProtocolError::UnknownSyncMessage(other)),
                };
                Ok(ProtocolMessage::Sync(msg))
            }
            MSG_AWARENESS => Ok(ProtocolMessage::Awareness(cursor.read_buf()?.to_vec())),
            MSG_AUTH => Ok(ProtocolMessage::Auth),
            MSG_QUERY_AWARENESS => Ok(ProtocolMessage::QueryAwareness),
            other => Err(ProtocolError::UnknownMessage(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ProtocolMessage::Sync(sync) => {
                buf.write_var(MSG_SYNC);
                let (sub, payload) = match sync {
                    SyncMessage::Step1(sv) => (MSG_SYNC_STEP1, sv),
                    SyncMessage::Step2(update) => (MSG_SYNC_STEP2, update),
                    SyncMessage::Update(update) => (MSG_SYNC_UPDATE, update),
                };
                buf.write_var(sub);
                buf.write_buf(payload);
            }
            ProtocolMessage::Awareness(payload) => {
                buf.write_var(MSG_AWARENESS);
                buf.write_buf(payload);
            }
            ProtocolMessage::Auth => buf.write_var(MSG_AUTH),
            ProtocolMessage::QueryAwareness => buf.write_var(MSG_QUERY_AWARENESS),
        }
        buf
    }
}

pub fn decode_awareness_update(payload: &[u8]) -> Result<Vec<AwarenessRecord>, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let len: u32 = cursor.read_var()?;
    // Each record takes at least three bytes; the count itself is untrusted.
    let mut records = Vec::with_capacity((len as usize).min(payload.len() / 3));
    for _ in 0..len {
        let client_id: u64 = cursor.read_var()?;
        let clock: u32 = cursor.read_var()?;
        let json = cursor.read_buf()?;
        let state: serde_json::Value =
            serde_json::from_slice(json).map_err(ProtocolError::InvalidAwarenessState)?;
        records.push(AwarenessRecord {
            client_id,
            clock,
            state: if state.is_null() { None } else { Some(state) },
        });
    }
    Ok(records)
}

pub fn encode_awareness_update(records: &[AwarenessRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_var(records.len() as u32);
    for record in records {
        buf.write_var(record.client_id);
        buf.write_var(record.clock);
        let json = match &record.state {
            Some(state) => state.to_string(),
            None => "null".to_string(),
        };
        buf.write_string(&json);
    }
    buf
}
