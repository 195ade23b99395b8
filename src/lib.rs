//! # rpc-session
//!
//! Shared JSON-RPC session layer between UI consumer surfaces and a local
//! automation backend.
//!
//! One WebSocket connection to the backend is shared by every surface of the
//! process. Each surface still gets what looks like a private session: its
//! own calls, its own stream callbacks and its own listeners.
//!
//! ## Architecture
//!
//! - **Protocol Engine**: owns the socket, reconnects with backoff and
//!   matches replies to calls by wire id
//! - **Session Bridge**: attaches consumer channels, broadcasts state and
//!   events, routes each call's outcome back to its originator
//! - **Consumer Proxy**: call/await and subscribe API over one channel
//!
//! ```text
//! ConsumerProxy ─┐                          ┌─► writer task ─► socket
//! ConsumerProxy ─┼─► SessionBridge ─► ProtocolEngine
//! ConsumerProxy ─┘                          └─◄ supervisor ◄── socket
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use rpc_session::{ConsumerProxy, ProtocolEngine, SessionBridge};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ProtocolEngine::builder().port(8765).build()?;
//!     let bridge = SessionBridge::new(engine.clone());
//!     engine.connect();
//!
//!     let proxy = ConsumerProxy::attach(&bridge);
//!     let status = proxy.request("task.status", json!({})).await?;
//!     println!("{status}");
//!
//!     proxy.destroy();
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod supervisor;
pub mod transport;

mod listeners;
mod writer;

pub use backoff::{Backoff, BackoffPolicy};
pub use bridge::{BridgeEnvelope, ChannelEndpoint, ProxyEnvelope, SessionBridge};
pub use config::EngineConfig;
pub use engine::{
    CallResult, ConnectionState, Diagnostic, DiagnosticKind, EngineBuilder, PendingReply,
    ProtocolEngine,
};
pub use error::{CallError, SessionError};
pub use listeners::{Listeners, Subscription};
pub use protocol::{Event, RpcErrorObject};
pub use proxy::ConsumerProxy;
pub use supervisor::{follow_backend, BackendStatus};
