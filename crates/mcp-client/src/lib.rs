//! `tether-mcp-client` — MCP (Model Context Protocol) client over stdio.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types and inbound message classification.
//! - A stdio transport that spawns child processes and speaks
//!   newline-delimited JSON-RPC over stdin/stdout, with id-based
//!   correlation so any number of requests can be in flight at once.
//! - An [`McpClient`] per server owning the connect/disconnect state
//!   machine and a lifecycle event feed.
//! - An [`McpManager`] that owns one client per configured server and
//!   aggregates tool discovery and dispatch across them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_mcp_client::McpManager;
//!
//! let config: tether_domain::McpConfig = /* from TOML */;
//! let manager = McpManager::from_config(&config);
//! manager.start_autostart().await;
//!
//! // List all discovered tools, tagged with their server.
//! for entry in manager.all_tools() {
//!     println!("mcp:{}:{}", entry.server_id, entry.tool.name);
//! }
//!
//! // Call a tool.
//! let result = manager.call_tool("filesystem", "read_file", json!({"path": "/tmp/test.txt"})).await?;
//! ```

pub mod client;
pub mod correlator;
pub mod events;
pub mod framer;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience.
pub use client::{McpClient, McpError};
pub use events::{ConnectionStatus, McpEvent};
pub use manager::{AggregatedTool, McpManager, ServerStatus};
pub use protocol::{McpToolDef, ToolCallContent, ToolCallResult};
pub use transport::{McpTransport, StdioTransport, TransportError, TransportFactory};
