use serde_json::Value;

use crate::models::ReceivedMessage;

/// A socket frame after classification.
#[derive(Debug)]
pub enum Frame {
    Control(ControlFrame),
    /// Opaque bytes for the replication pipeline
    Replication(Vec<u8>),
}

#[derive(Debug)]
pub enum ControlFrame {
    Message(ReceivedMessage),
    /// Known control type with an unusable body
    Malformed { kind: String, reason: String },
}

/// Split JSON control frames from replication frames.
///
/// Only a payload starting with `{` that parses as a JSON object is a
/// control frame. Objects whose `type` is not a known control message fall
/// through to replication unchanged.
pub fn classify(payload: Vec<u8>) -> Frame {
    if payload.first() != Some(&b'{') {
        return Frame::Replication(payload);
    }

    let value = match serde_json::from_slice::<Value>(&payload) {
        Ok(value @ Value::Object(_)) => value,
        _ => return Frame::Replication(payload),
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    match serde_json::from_value::<ReceivedMessage>(value) {
        Ok(msg) => Frame::Control(ControlFrame::Message(msg)),
        Err(e) => match kind {
            Some(kind) if is_control_type(&kind) => {
                Frame::Control(ControlFrame::Malformed { kind, reason: e.to_string() })
            }
            _ => Frame::Replication(payload),
        },
    }
}

fn is_control_type(kind: &str) -> bool {
    matches!(kind, "execute")
}
