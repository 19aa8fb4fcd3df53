//! Connection status and the per-server event feed.

use serde::Serialize;

use crate::protocol::McpToolDef;

/// Connection state of a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error { message: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "stopped"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Event emitted by a client as its connection changes.
///
/// Delivered over a `tokio::sync::broadcast` feed, so a slow consumer
/// can lag without ever blocking the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpEvent {
    /// Handshake and tool discovery completed.
    Connected,
    /// The connection went away, on request or not.
    Disconnected { reason: String },
    /// A connection attempt failed.
    Error { message: String },
    /// The server's tool list was replaced. Sent before `Connected` so
    /// subscribers already hold the list when the connection reports
    /// ready.
    ToolsUpdated { tools: Vec<McpToolDef> },
}
