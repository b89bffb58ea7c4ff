use serde::{Deserialize, Serialize};

/// Emitted to every connection whenever a new client arrives.
pub const GREETING: &str = "Hello!";

/// Broadcast in place of the payload whenever a client triggers `test`.
pub const TEST_RECEIVED: &str = "Test received";

/// Named events a client may send, one JSON text frame each:
/// `{"event":"message","data":"hi"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Message(String),
    /// Payload may be any JSON value or left out; the relay never looks at it.
    Test(Option<serde_json::Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(String),
}

pub fn decode_client_event(frame: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(frame.trim())
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
