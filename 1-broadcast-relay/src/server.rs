use std::{
    future::{Future, IntoFuture},
    net::SocketAddr,
};

use anyhow::{Context, Result, bail};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{net::TcpListener, select, sync::mpsc, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    hub::{ConnectionId, Hub},
    message::{ServerEvent, decode_client_event, encode_server_event},
};

pub struct BroadcastRelay {
    listener: TcpListener,
    hub: Hub,
    registry: JoinHandle<()>,
}

impl BroadcastRelay {
    pub fn new(listener: TcpListener) -> Self {
        let (hub, registry) = Hub::spawn();
        Self {
            listener,
            hub,
            registry,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let BroadcastRelay {
            listener,
            hub,
            mut registry,
        } = self;
        let server = axum::serve(listener, router(hub))
            .with_graceful_shutdown(shutdown)
            .into_future();

        // The router holds a hub handle, so the registry only ends early by failing.
        select! {
            served = server => served.context("http server failed")?,
            stopped = &mut registry => bail!("hub task stopped while serving: {stopped:?}"),
        }
        info!("relay shutting down");
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

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn index() -> StatusCode {
    info!("GET");
    StatusCode::OK
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (sink, mut stream) = socket.split();
    let (outbox, inbox) = mpsc::unbounded_channel();

    let id = match hub.connect(outbox).await {
        Ok(id) => id,
        Err(err) => {
            warn!(error = ?err, "failed to register connection");
            return;
        }
    };
    let writer = tokio::spawn(forward_outbox(id, inbox, sink));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text_frame(&hub, id, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(connection = id, error = ?err, "socket read failed");
                break;
            }
        }
    }

    if let Err(err) = hub.disconnect(id) {
        warn!(connection = id, error = ?err, "failed to unregister connection");
        writer.abort();
    }
}

fn handle_text_frame(hub: &Hub, id: ConnectionId, text: &str) {
    match decode_client_event(text) {
        Ok(event) => {
            if let Err(err) = hub.dispatch(id, event) {
                warn!(connection = id, error = ?err, "failed to dispatch event");
            }
        }
        Err(err) => warn!(connection = id, error = %err, "ignoring malformed frame"),
    }
}

/// Drains the connection's outbox into the socket until the hub drops it.
async fn forward_outbox(
    id: ConnectionId,
    mut inbox: mpsc::UnboundedReceiver<ServerEvent>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(event) = inbox.recv().await {
        let encoded = match encode_server_event(&event) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(connection = id, error = %err, "failed to encode event");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(encoded)).await {
            debug!(connection = id, error = ?err, "failed to deliver event");
            break;
        }
    }
    let _ = sink.close().await;
}
