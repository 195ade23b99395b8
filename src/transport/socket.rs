//! WebSocket connector.
//!
//! The backend listens on a fixed loopback address. One call to [`connect`]
//! is one attempt; retrying is the engine's business.
//!
//! # Example
//!
//! ```
//! use rpc_session::transport::Endpoint;
//!
//! let endpoint = Endpoint::loopback(9001);
//! assert_eq!(endpoint.as_str(), "ws://127.0.0.1:9001/");
//!
//! assert!(Endpoint::parse("http://127.0.0.1:9001").is_err());
//! ```

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Result, SessionError};

/// Default backend host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default backend port.
pub const DEFAULT_PORT: u16 = 8765;

/// Connected WebSocket stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Validated backend address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse and validate a WebSocket URL.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let invalid = |reason: String| SessionError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(invalid(format!("unsupported scheme `{other}`"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(Self { url })
    }

    /// `ws://127.0.0.1:{port}/`.
    pub fn loopback(port: u16) -> Self {
        let url = Url::parse(&format!("ws://{DEFAULT_HOST}:{port}/"))
            .unwrap_or_else(|_| unreachable!("loopback URL is always valid"));
        Self { url }
    }

    /// Same endpoint on another port.
    pub fn with_port(&self, port: u16) -> Self {
        let mut url = self.url.clone();
        // ws/wss URLs always accept a port.
        let _ = url.set_port(Some(port));
        Self { url }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::loopback(DEFAULT_PORT)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Make one connection attempt, bounded by `timeout`.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<WsStream> {
    match tokio::time::timeout(timeout, connect_async(endpoint.as_str())).await {
        Ok(Ok((stream, _response))) => {
            tracing::debug!(endpoint = %endpoint, "WebSocket handshake complete");
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SessionError::ConnectTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_is_loopback() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.as_str(), "ws://127.0.0.1:8765/");
        assert_eq!(endpoint.port(), Some(DEFAULT_PORT));
    }

    #[test]
    fn test_parse_accepts_ws_and_wss() {
        assert!(Endpoint::parse("ws://localhost:9000/rpc").is_ok());
        assert!(Endpoint::parse("wss://127.0.0.1/").is_ok());
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = Endpoint::parse("tcp://127.0.0.1:9000").unwrap_err();
        assert!(matches!(err, SessionError::InvalidEndpoint { .. }));
        assert!(err.to_string().contains("unsupported scheme"));
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_with_port() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:1/rpc").unwrap().with_port(4242);
        assert_eq!(endpoint.as_str(), "ws://127.0.0.1:4242/rpc");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = connect(&Endpoint::loopback(port), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SessionError::WebSocket(_))));
    }
}
