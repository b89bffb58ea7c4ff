use tokio_tungstenite::tungstenite::Message;

/// Sent once to each client right after the handshake.
pub const WELCOME: &str = "Welcome to the WebSocket server!";

pub fn echo_reply(text: &str) -> String {
    format!("Server: You said \"{text}\"")
}

/// Extracts the text a client sent, if the frame carries any.
///
/// Binary payloads are read as UTF-8, replacing invalid sequences.
pub fn frame_text(frame: Message) -> Option<String> {
    match frame {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
