
use serde::{Deserialize, Serialize};
use crate::models::{ExecuteRequest, ExecutionResult};

/// JSON frames a client may send on the collaboration socket
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "execute")]
    Execute(ExecuteRequest),
}

/// JSON frames sent to a single client
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "execution-result")]
    ExecutionResult(ExecutionResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execution_result_is_tagged() {
        let msg = SendMessage::ExecutionResult(ExecutionResult::runtime_error("x"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "execution-result");
        assert_eq!(value["status"]["id"], 11);
    }

    #[test]
    fn execute_frame_ignores_extra_fields() {
        let msg: ReceivedMessage = serde_json::from_value(json!({
            "type": "execute",
            "source_code": "print(1)",
            "language_id": "71",
            "client": "monaco"
        }))
        .unwrap();
        let ReceivedMessage::Execute(req) = msg;
        assert_eq!(req.source_code.as_deref(), Some("print(1)"));
    }
}
