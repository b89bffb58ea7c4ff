//! Registry of live connections and the event dispatch that fans out to them.
//!
//! A single task owns the registry. Sessions talk to it through a [`Hub`]
//! handle, so registration, removal and fan-out are applied one command at a
//! time in arrival order and never need a lock.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::message::{ClientEvent, GREETING, ServerEvent, TEST_RECEIVED};

pub type ConnectionId = u64;

/// Per-connection queue of events waiting to be written to the socket.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Cloneable handle to the task that owns the connection registry.
///
/// The task keeps running while at least one handle is alive.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

enum HubCommand {
    Connect {
        outbox: Outbox,
        respond_to: oneshot::Sender<ConnectionId>,
    },
    Dispatch {
        id: ConnectionId,
        event: ClientEvent,
    },
    Disconnect {
        id: ConnectionId,
    },
    Count {
        respond_to: oneshot::Sender<usize>,
    },
}

impl Hub {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_registry(inbox));
        (Self { commands }, task)
    }

    /// Registers a connection and greets everyone, the newcomer included.
    pub async fn connect(&self, outbox: Outbox) -> Result<ConnectionId> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Connect { outbox, respond_to })?;
        response.await.context("hub dropped connect response")
    }

    pub fn dispatch(&self, id: ConnectionId, event: ClientEvent) -> Result<()> {
        self.send(HubCommand::Dispatch { id, event })
    }

    pub fn disconnect(&self, id: ConnectionId) -> Result<()> {
        self.send(HubCommand::Disconnect { id })
    }

    pub async fn connection_count(&self) -> Result<usize> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Count { respond_to })?;
        response.await.context("hub dropped count response")
    }

    fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .ok()
            .context("hub task is no longer running")
    }
}

async fn run_registry(mut inbox: mpsc::UnboundedReceiver<HubCommand>) {
    let mut registry = Registry::default();
    while let Some(command) = inbox.recv().await {
        registry.apply(command);
    }
    debug!("hub stopped");
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Outbox>,
    next_id: ConnectionId,
}

impl Registry {
    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { outbox, respond_to } => {
                let id = self.register(outbox);
                let _ = respond_to.send(id);
            }
            HubCommand::Dispatch { id, event } => self.dispatch(id, event),
            HubCommand::Disconnect { id } => self.remove(id),
            HubCommand::Count { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    fn register(&mut self, outbox: Outbox) -> ConnectionId {
        self.next_id += 1;
        let id = self.next_id;
        self.connections.insert(id, outbox);
        info!(connection = id, "a user connected");
        self.broadcast(ServerEvent::Message(GREETING.to_string()));
        id
    }

    fn dispatch(&mut self, id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::Message(text) => {
                info!(connection = id, %text, "message received");
                self.broadcast(ServerEvent::Message(text));
            }
            ClientEvent::Test(payload) => {
                info!(connection = id, ?payload, "test event received");
                self.broadcast(ServerEvent::Message(TEST_RECEIVED.to_string()));
            }
        }
    }

    fn remove(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            info!(connection = id, "a user disconnected");
        }
    }

    /// Best effort: a closed outbox is skipped and never stops the others.
    fn broadcast(&self, event: ServerEvent) -> usize {
        let mut delivered = 0;
        for (id, outbox) in &self.connections {
            if outbox.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(connection = id, "skipped delivery to closed connection");
            }
        }
        delivered
    }
}
