//! Connection state and diagnostics broadcast by the engine.

use serde::{Deserialize, Serialize};

/// Lifecycle of the engine's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Idle,
    /// Attempt in flight.
    Connecting,
    /// Socket up; calls are possible.
    Open,
    /// Socket gone cleanly, or explicitly disconnected.
    Closed,
    /// Attempt failed or socket broke.
    Error,
}

impl ConnectionState {
    #[inline]
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Refused, reset or timed-out socket. Recovered by reconnecting.
    Transport,
    /// Malformed frame, unknown or duplicate reply id. Frame discarded.
    Protocol,
}

/// A failure the session layer handled itself, reported for visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Transport,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Protocol,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DiagnosticKind::Transport => "transport",
            DiagnosticKind::Protocol => "protocol",
        };
        write!(f, "{kind}: {}", self.message)
    }
}
