//! Echo relay: a raw WebSocket server that welcomes each client and answers
//! every message back to its sender.
//!
//! - [`cli`] parses the command-line interface.
//! - [`server`] accepts connections and runs one echo session per client.
//! - [`message`] holds the fixed replies and frame decoding.

pub mod cli;
pub mod message;
pub mod server;
