//! Connection supervisor.
//!
//! One task owns the socket for the engine's lifetime and walks an explicit
//! phase machine:
//!
//! ```text
//!            connect()                 handshake ok
//!   Idle ─────────────────► Connecting ─────────────► Open
//!    ▲                        │    ▲                    │
//!    │ disconnect()   failure │    │ delay elapsed /    │ socket lost
//!    │                        ▼    │ reconnect_now()    │
//!    └──────────────────── Backoff ◄────────────────────┘
//! ```
//!
//! Commands from the engine handle are selected against whatever the current
//! phase is waiting on, so `disconnect()` interrupts a handshake and
//! `reconnect_now()` cuts a backoff wait short.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{ConnectionState, Diagnostic, EngineInner};
use crate::backoff::Backoff;
use crate::transport::{self, WsStream};
use crate::writer::spawn_writer_task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Connect,
    Disconnect,
    ReconnectNow,
    Shutdown,
}

enum Phase {
    Idle,
    Connecting,
    Open(Box<WsStream>),
    Backoff(Duration),
    Stopped,
}

pub(super) struct Supervisor {
    inner: Arc<EngineInner>,
    commands: mpsc::UnboundedReceiver<Command>,
    backoff: Backoff,
}

impl Supervisor {
    pub(super) fn new(
        inner: Arc<EngineInner>,
        commands: mpsc::UnboundedReceiver<Command>,
        backoff: Backoff,
    ) -> Self {
        Self {
            inner,
            commands,
            backoff,
        }
    }

    pub(super) async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Open(stream) => self.open(*stream).await,
                Phase::Backoff(delay) => self.wait(delay).await,
                Phase::Stopped => break,
            };
        }

        self.inner.connection_lost(ConnectionState::Closed);
        tracing::debug!("Connection supervisor stopped");
    }

    async fn idle(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                Some(Command::Connect) => {
                    self.backoff.reset();
                    self.inner.set_attempts(0);
                    return Phase::Connecting;
                }
                Some(Command::Shutdown) | None => return Phase::Stopped,
                Some(Command::Disconnect | Command::ReconnectNow) => {}
            }
        }
    }

    async fn connecting(&mut self) -> Phase {
        self.inner.transition(ConnectionState::Connecting);

        let endpoint = self.inner.config.endpoint.clone();
        let attempt = transport::connect(&endpoint, self.inner.config.connect_timeout);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(stream) => Phase::Open(Box::new(stream)),
                        Err(e) => self.schedule_retry(ConnectionState::Error, &e.to_string()),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) => {
                        self.inner.connection_lost(ConnectionState::Closed);
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => return Phase::Stopped,
                    Some(Command::Connect | Command::ReconnectNow) => {}
                },
            }
        }
    }

    async fn open(&mut self, stream: WsStream) -> Phase {
        let (sink, mut source) = stream.split();
        let (writer, mut writer_task) =
            spawn_writer_task(sink, self.inner.config.write_queue_capacity);

        self.inner.opened(writer);
        self.backoff.reset();
        tracing::info!(endpoint = %self.inner.config.endpoint, "Connected to backend");

        let (state, reason) = loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.inner.dispatch(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.inner.dispatch(text),
                        Err(_) => {
                            tracing::warn!(len = bytes.len(), "Discarding non UTF-8 binary frame");
                            self.inner
                                .diagnose(Diagnostic::protocol("binary frame is not valid UTF-8"));
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        break (ConnectionState::Closed, "backend closed the connection".to_string());
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break (lost_state(&e), e.to_string()),
                },
                result = &mut writer_task => {
                    let reason = match result {
                        Ok(Ok(())) => "writer stopped".to_string(),
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => e.to_string(),
                    };
                    break (ConnectionState::Error, reason);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) => {
                        tracing::info!("Disconnecting from backend");
                        self.inner.connection_lost(ConnectionState::Closed);
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => return Phase::Stopped,
                    Some(Command::Connect | Command::ReconnectNow) => {}
                },
            }
        };

        self.schedule_retry(state, &reason)
    }

    async fn wait(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return Phase::Connecting,
                command = self.commands.recv() => match command {
                    Some(Command::Connect | Command::ReconnectNow) => {
                        tracing::debug!("Skipping backoff wait");
                        return Phase::Connecting;
                    }
                    Some(Command::Disconnect) => {
                        self.inner.transition(ConnectionState::Closed);
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => return Phase::Stopped,
                },
            }
        }
    }

    /// Tear down after a failure and pick the next delay.
    fn schedule_retry(&mut self, state: ConnectionState, reason: &str) -> Phase {
        let rejected = self.inner.connection_lost(state);
        self.inner.diagnose(Diagnostic::transport(reason));

        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempts();
        self.inner.set_attempts(attempt);

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            rejected,
            "Connection {}: {}",
            state,
            reason
        );
        Phase::Backoff(delay)
    }
}

/// State reported when the socket breaks with `error`.
fn lost_state(error: &WsError) -> ConnectionState {
    match error {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => ConnectionState::Closed,
        _ => ConnectionState::Error,
    }
}
