//! In-test backend: a WebSocket server on an ephemeral loopback port.
//!
//! Every accepted connection is handed to the test as a [`Peer`], so the test
//! decides what the backend reads, answers and when it hangs up.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rpc_session::{ConnectionState, ProtocolEngine};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockBackend {
    port: u16,
    peers: mpsc::UnboundedReceiver<Peer>,
}

pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::start_on(0).await
    }

    /// Listen on a specific port (0 for an ephemeral one).
    pub async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                if tx.send(Peer { ws }).is_err() {
                    break;
                }
            }
        });

        Self { port, peers }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.port)
    }

    /// Next accepted connection.
    pub async fn accept(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("no connection within timeout")
            .expect("listener stopped")
    }
}

impl Peer {
    /// Next text frame from the engine, parsed.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("connection ended")
                .expect("read failed");
            match msg {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::text(text.to_string())).await.unwrap();
    }

    /// Hang up without a close handshake.
    pub fn drop_connection(self) {
        drop(self.ws);
    }
}

/// A loopback port with nothing listening on it.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Engine pointed at `backend`, with fast deterministic reconnects.
pub fn engine_for(backend: &MockBackend) -> ProtocolEngine {
    engine_on_port(backend.port())
}

pub fn engine_on_port(port: u16) -> ProtocolEngine {
    ProtocolEngine::builder()
        .endpoint(&format!("ws://127.0.0.1:{port}/"))
        .base_delay(Duration::from_millis(50))
        .max_delay(Duration::from_millis(200))
        .jitter_ratio(0.0)
        .build()
        .unwrap()
}

/// Wait until `engine` reports `state`.
pub async fn wait_for_state(engine: &ProtocolEngine, state: ConnectionState) {
    tokio::time::timeout(WAIT, async {
        while engine.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("engine never reached {state}, stuck at {}", engine.state()));
}

/// Poll until `check` holds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}
