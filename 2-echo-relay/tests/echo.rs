use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use echo_relay::{
    message::WELCOME,
    server::{Connections, EchoRelay},
};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct RunningRelay {
    addr: SocketAddr,
    connections: Connections,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl RunningRelay {
    async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let relay = EchoRelay::new(listener);
        let addr = relay.local_addr()?;
        let connections = relay.connections();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            connections,
            shutdown,
            server,
        })
    }

    async fn connect(&self) -> Result<Client> {
        let (client, _) = connect_async(format!("ws://{}/", self.addr)).await?;
        Ok(client)
    }

    async fn wait_for_connections(&self, expected: usize) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
        loop {
            let count = self.connections.count().await;
            if count == expected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("expected {expected} connections, relay tracks {count}"));
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = timeout(READ_TIMEOUT, self.server).await;
    }
}

async fn next_text(client: &mut Client) -> Result<String> {
    loop {
        let frame = timeout(READ_TIMEOUT, client.next())
            .await
            .context("timed out waiting for reply")?
            .context("socket closed")??;
        if let Message::Text(text) = frame {
            return Ok(text);
        }
    }
}

async fn expect_silence(client: &mut Client) {
    if let Ok(frame) = timeout(QUIET_PERIOD, client.next()).await {
        panic!("expected no further frames, got {frame:?}");
    }
}

#[tokio::test]
async fn welcome_arrives_before_anything_else() -> Result<()> {
    let relay = RunningRelay::start().await?;
    let mut client = relay.connect().await?;

    // Send immediately; the welcome must still come first.
    client.send(Message::Text("early".into())).await?;
    assert_eq!(next_text(&mut client).await?, WELCOME);
    assert_eq!(next_text(&mut client).await?, r#"Server: You said "early""#);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn reply_goes_to_sender_only() -> Result<()> {
    let relay = RunningRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;
    assert_eq!(next_text(&mut alice).await?, WELCOME);
    assert_eq!(next_text(&mut bob).await?, WELCOME);

    alice.send(Message::Text("foo".into())).await?;
    assert_eq!(next_text(&mut alice).await?, r#"Server: You said "foo""#);
    expect_silence(&mut alice).await;
    expect_silence(&mut bob).await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn binary_frames_are_echoed_as_text() -> Result<()> {
    let relay = RunningRelay::start().await?;
    let mut client = relay.connect().await?;
    assert_eq!(next_text(&mut client).await?, WELCOME);

    client.send(Message::Binary(b"raw".to_vec())).await?;
    assert_eq!(next_text(&mut client).await?, r#"Server: You said "raw""#);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn disconnect_removes_client_and_relay_keeps_serving() -> Result<()> {
    let relay = RunningRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;
    assert_eq!(next_text(&mut alice).await?, WELCOME);
    assert_eq!(next_text(&mut bob).await?, WELCOME);
    relay.wait_for_connections(2).await?;

    bob.close(None).await?;
    relay.wait_for_connections(1).await?;

    alice.send(Message::Text("still here".into())).await?;
    assert_eq!(
        next_text(&mut alice).await?,
        r#"Server: You said "still here""#
    );

    let mut carol = relay.connect().await?;
    assert_eq!(next_text(&mut carol).await?, WELCOME);
    relay.wait_for_connections(2).await?;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn failed_handshake_does_not_stop_the_relay() -> Result<()> {
    let relay = RunningRelay::start().await?;

    let mut raw = TcpStream::connect(relay.addr).await?;
    raw.write_all(b"GET / HTTP/1.1\r\nHost: nowhere\r\n\r\n").await?;
    drop(raw);

    let mut client = relay.connect().await?;
    assert_eq!(next_text(&mut client).await?, WELCOME);
    relay.wait_for_connections(1).await?;

    relay.stop().await;
    Ok(())
}
