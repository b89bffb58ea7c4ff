use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::Mutex,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::message::{WELCOME, echo_reply, frame_text};

pub type ClientId = u64;

pub struct EchoRelay {
    listener: TcpListener,
    connections: Connections,
}

impl EchoRelay {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            connections: Connections::default(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connections(&self) -> Connections {
        self.connections.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let EchoRelay {
            listener,
            connections,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &connections);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Clients that have completed the handshake and not yet disconnected.
#[derive(Clone, Default)]
pub struct Connections {
    inner: Arc<ConnectionsInner>,
}

#[derive(Default)]
struct ConnectionsInner {
    clients: Mutex<HashMap<ClientId, SocketAddr>>,
    next_id: AtomicU64,
}

impl Connections {
    pub async fn count(&self) -> usize {
        self.inner.clients.lock().await.len()
    }

    async fn register(&self, peer: SocketAddr) -> ClientId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.clients.lock().await.insert(id, peer);
        id
    }

    async fn remove(&self, id: ClientId) -> Option<SocketAddr> {
        self.inner.clients.lock().await.remove(&id)
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    connections: &Connections,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, connections),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, connections: &Connections) {
    let connections = connections.clone();
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, connections).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connections: Connections,
) -> Result<()> {
    let socket = accept_async(stream)
        .await
        .context("websocket handshake failed")?;
    let id = connections.register(peer).await;
    info!(client = id, peer = %peer, "new client connected");

    let result = run_echo_session(socket, id).await;

    if connections.remove(id).await.is_some() {
        info!(client = id, peer = %peer, "client disconnected");
    }
    result
}

async fn run_echo_session(mut socket: WebSocketStream<TcpStream>, id: ClientId) -> Result<()> {
    socket
        .send(Message::Text(WELCOME.to_string()))
        .await
        .context("failed to send welcome")?;

    while let Some(frame) = socket.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(client = id, error = ?err, "socket read failed");
                break;
            }
        };
        if frame.is_close() {
            break;
        }
        let Some(text) = frame_text(frame) else {
            continue;
        };

        info!(client = id, %text, "received message");
        socket
            .send(Message::Text(echo_reply(&text)))
            .await
            .context("failed to send reply")?;
    }

    Ok(())
}
