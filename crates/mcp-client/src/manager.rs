//! MCP manager — owns one client per configured server and aggregates
//! tool discovery and dispatch across them.
//!
//! Servers are fully independent: one connecting, crashing, or timing
//! out never blocks operations on another.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use tether_domain::config::{ClientSettings, McpConfig, ServerConfig};

use crate::client::{McpClient, McpError};
use crate::events::{ConnectionStatus, McpEvent};
use crate::protocol::{McpToolDef, ToolCallResult};
use crate::transport::{DefaultTransportFactory, TransportFactory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A discovered tool tagged with the server it came from.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedTool {
    pub server_id: String,
    pub server_name: String,
    pub tool: McpToolDef,
}

/// Point-in-time status of one managed server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub tool_count: usize,
    pub autostart: bool,
}

struct ServerEntry {
    client: Arc<McpClient>,
    autostart: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of all configured MCP servers.
pub struct McpManager {
    settings: ClientSettings,
    factory: Arc<dyn TransportFactory>,
    servers: RwLock<HashMap<String, ServerEntry>>,
}

impl McpManager {
    /// Create an empty manager (no MCP servers configured).
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_factory(settings, Arc::new(DefaultTransportFactory))
    }

    pub fn with_factory(settings: ClientSettings, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            settings,
            factory,
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Build a manager from config. Every server starts out stopped;
    /// call [`McpManager::start_autostart`] to bring up the flagged
    /// ones.
    ///
    /// Entries with a duplicate id are logged and skipped.
    pub fn from_config(config: &McpConfig) -> Self {
        Self::from_config_with_factory(config, Arc::new(DefaultTransportFactory))
    }

    pub fn from_config_with_factory(
        config: &McpConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let manager = Self::with_factory(config.client.clone(), factory);
        for server_config in &config.servers {
            if let Err(e) = manager.add_server(server_config.clone()) {
                tracing::warn!(
                    server_id = %server_config.id,
                    error = %e,
                    "skipping MCP server from config"
                );
            }
        }
        manager
    }

    /// Register a server. The new client starts out stopped.
    pub fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        let mut servers = self.servers.write();
        if servers.contains_key(&config.id) {
            return Err(McpError::AlreadyConfigured(config.id));
        }

        let id = config.id.clone();
        let autostart = config.autostart;
        let client = Arc::new(McpClient::with_factory(
            config,
            self.settings.clone(),
            self.factory.clone(),
        ));
        servers.insert(id.clone(), ServerEntry { client, autostart });
        tracing::debug!(server_id = %id, autostart, "MCP server registered");
        Ok(())
    }

    /// Remove a server, stopping its client first if needed.
    pub async fn remove_server(&self, server_id: &str) -> Result<(), McpError> {
        let entry = self
            .servers
            .write()
            .remove(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_owned()))?;
        entry.client.stop().await;
        tracing::info!(server_id = %server_id, "MCP server removed");
        Ok(())
    }

    /// Flip a server's autostart flag.
    pub fn set_autostart(&self, server_id: &str, autostart: bool) -> Result<(), McpError> {
        let mut servers = self.servers.write();
        let entry = servers
            .get_mut(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_owned()))?;
        entry.autostart = autostart;
        Ok(())
    }

    /// Start every server flagged for autostart, concurrently.
    ///
    /// Servers that fail to come up are logged and skipped; they stay
    /// in the error state and can be started again later.
    pub async fn start_autostart(&self) {
        let clients: Vec<Arc<McpClient>> = {
            let servers = self.servers.read();
            servers
                .values()
                .filter(|entry| entry.autostart)
                .map(|entry| entry.client.clone())
                .collect()
        };
        if clients.is_empty() {
            return;
        }

        tracing::info!(count = clients.len(), "starting autostart MCP servers");
        let futs: Vec<_> = clients
            .iter()
            .map(|client| async move {
                if let Err(e) = client.start().await {
                    tracing::warn!(
                        server_id = %client.id(),
                        error = %e,
                        "failed to start MCP server, skipping"
                    );
                }
            })
            .collect();
        futures_util::future::join_all(futs).await;
    }

    /// Start one server by id.
    pub async fn start(&self, server_id: &str) -> Result<(), McpError> {
        self.client(server_id)?.start().await
    }

    /// Stop one server by id.
    pub async fn stop(&self, server_id: &str) -> Result<(), McpError> {
        self.client(server_id)?.stop().await;
        Ok(())
    }

    /// Subscribe to one server's lifecycle events.
    pub fn subscribe(&self, server_id: &str) -> Result<broadcast::Receiver<McpEvent>, McpError> {
        Ok(self.client(server_id)?.subscribe())
    }

    /// All tools across connected servers, each tagged with its
    /// origin.
    pub fn all_tools(&self) -> Vec<AggregatedTool> {
        let servers = self.servers.read();
        servers
            .values()
            .filter(|entry| entry.client.status().is_connected())
            .flat_map(|entry| {
                let server_id = entry.client.id().to_owned();
                let server_name = entry.client.config().display_name().to_owned();
                entry.client.tools().into_iter().map(move |tool| AggregatedTool {
                    server_id: server_id.clone(),
                    server_name: server_name.clone(),
                    tool,
                })
            })
            .collect()
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        self.client(server_id)?.call_tool(tool_name, arguments).await
    }

    /// Status snapshot for every configured server.
    pub fn status_map(&self) -> HashMap<String, ServerStatus> {
        self.servers
            .read()
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    ServerStatus {
                        name: entry.client.config().display_name().to_owned(),
                        status: entry.client.status(),
                        connected_at: entry.client.connected_at(),
                        tool_count: entry.client.tools().len(),
                        autostart: entry.autostart,
                    },
                )
            })
            .collect()
    }

    /// Number of configured servers.
    pub fn server_count(&self) -> usize {
        self.servers.read().len()
    }

    /// Total number of tools across connected servers.
    pub fn tool_count(&self) -> usize {
        self.servers
            .read()
            .values()
            .filter(|entry| entry.client.status().is_connected())
            .map(|entry| entry.client.tools().len())
            .sum()
    }

    /// Check if there are any configured servers.
    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Stop all servers concurrently.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<McpClient>> = {
            let servers = self.servers.read();
            servers.values().map(|entry| entry.client.clone()).collect()
        };
        if clients.is_empty() {
            return;
        }

        tracing::info!(count = clients.len(), "shutting down MCP servers");
        let futs: Vec<_> = clients.iter().map(|client| client.stop()).collect();
        futures_util::future::join_all(futs).await;
    }

    fn client(&self, server_id: &str) -> Result<Arc<McpClient>, McpError> {
        self.servers
            .read()
            .get(server_id)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_owned()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
