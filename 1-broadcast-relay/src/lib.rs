//! Broadcast relay: every message a client sends is fanned out to all
//! connected clients, sender included.
//!
//! - [`cli`] parses the command-line interface.
//! - [`hub`] owns the registry of live connections and dispatches client
//!   events to it from a single task.
//! - [`server`] serves the HTTP routes and runs one WebSocket session per
//!   client.
//! - [`message`] defines the JSON event envelope carried in text frames.

pub mod cli;
pub mod hub;
pub mod message;
pub mod server;
