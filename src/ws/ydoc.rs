use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Doc, GetString, Map, Out, ReadTxn, StateVector, Text, Transact, Update};

use super::update_check::{check_state_vector_v1, check_update_v1, UpdateCheckError};

/// Name of the shared text bound to the editor.
pub const TEXT_NAME: &str = "monaco";
/// Name of the shared map holding the last execution output.
pub const OUTPUTS_NAME: &str = "outputs";

#[derive(Debug)]
pub enum DocumentError {
    Decode(yrs::encoding::read::Error),
    Rejected(UpdateCheckError),
    Apply(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::Decode(e) => write!(f, "Failed to decode update: {}", e),
            DocumentError::Rejected(e) => write!(f, "Rejected update: {}", e),
            DocumentError::Apply(e) => write!(f, "Failed to apply update: {}", e),
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<UpdateCheckError> for DocumentError {
    fn from(e: UpdateCheckError) -> Self {
        DocumentError::Rejected(e)
    }
}

impl From<yrs::encoding::read::Error> for DocumentError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DocumentError::Decode(e)
    }
}

/// A room's replicated body: the editor text plus the shared outputs map.
pub struct ReplicatedDocument {
    doc: Doc,
    seeded: bool,
}

impl ReplicatedDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        // Root types must exist before the first transaction touches them.
        doc.get_or_insert_text(TEXT_NAME);
        doc.get_or_insert_map(OUTPUTS_NAME);
        Self { doc, seeded: false }
    }

    /// Apply a v1 update. Applying an update twice leaves the state unchanged.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        check_update_v1(update)?;
        let update = Update::decode_v1(update)?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    /// Full document state as a single v1 update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Everything the holder of `state_vector` is missing.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        check_state_vector_v1(state_vector)?;
        let sv = StateVector::decode_v1(state_vector)?;
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    pub fn text(&self) -> String {
        let text = self.doc.get_or_insert_text(TEXT_NAME);
        let txn = self.doc.transact();
        text.get_string(&txn)
    }

    /// Snapshot of the shared outputs map (`stdout`, `stderr`, `runner`, `ts`).
    pub fn output_map(&self) -> BTreeMap<String, Value> {
        let map = self.doc.get_or_insert_map(OUTPUTS_NAME);
        let txn = self.doc.transact();
        map.iter(&txn)
            .map(|(key, value)| {
                let json = match value {
                    Out::Any(any) => any_to_json(&any),
                    other => Value::String(other.to_string(&txn)),
                };
                (key.to_string(), json)
            })
            .collect()
    }

    /// Insert `content` if the text is empty and the room was never seeded.
    ///
    /// Returns the update produced by the insert so it can be relayed.
    pub fn seed_if_empty(&mut self, content: &str) -> Option<Vec<u8>> {
        if self.seeded || content.is_empty() {
            return None;
        }
        self.seeded = true;

        let text = self.doc.get_or_insert_text(TEXT_NAME);
        let mut txn = self.doc.transact_mut();
        if text.len(&txn) > 0 {
            return None;
        }
        text.insert(&mut txn, 0, content);
        debug!("Seeded empty document with {} bytes", content.len());
        Some(txn.encode_update_v1())
    }
}

impl Default for ReplicatedDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(n) => Value::from(*n),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}
