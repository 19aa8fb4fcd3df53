//! Single-server MCP client.
//!
//! An [`McpClient`] owns the connection lifecycle for one configured
//! server: `disconnected -> connecting -> connected`, with failures
//! landing in a recoverable `error` state. All transitions are
//! serialized through one async mutex; a generation counter tags each
//! connection attempt so a stale exit notification from a previous
//! process can never tear down its successor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use tether_domain::config::{ClientSettings, ServerConfig};

use crate::events::{ConnectionStatus, McpEvent};
use crate::process::ProcessEvent;
use crate::protocol::{
    initialize_params, tool_call_params, InitializeResult, McpToolDef, ToolCallResult,
    ToolsListResult, PROTOCOL_VERSION,
};
use crate::transport::{DefaultTransportFactory, McpTransport, TransportError, TransportFactory};

/// Capacity of the per-client event feed.
const EVENT_CHANNEL: usize = 64;

/// Errors surfaced by the client and manager layer.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("not connected")]
    NotConnected,

    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("MCP server already configured: {0}")]
    AlreadyConfigured(String),
}

impl From<crate::protocol::JsonRpcError> for McpError {
    fn from(err: crate::protocol::JsonRpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client for a single MCP server.
pub struct McpClient {
    config: ServerConfig,
    settings: ClientSettings,
    factory: Arc<dyn TransportFactory>,
    shared: Arc<ClientShared>,
}

/// State reachable from the exit watcher task, independent of the
/// `McpClient` handle's lifetime.
struct ClientShared {
    server_id: String,
    /// Serializes lifecycle transitions. Never held across a tool call.
    state: tokio::sync::Mutex<ClientState>,
    /// Snapshot fields readable without touching the async mutex.
    status: parking_lot::RwLock<ConnectionStatus>,
    connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    tools: parking_lot::RwLock<Vec<McpToolDef>>,
    events: broadcast::Sender<McpEvent>,
}

#[derive(Default)]
struct ClientState {
    transport: Option<Arc<dyn McpTransport>>,
    generation: u64,
}

impl McpClient {
    pub fn new(config: ServerConfig, settings: ClientSettings) -> Self {
        Self::with_factory(config, settings, Arc::new(DefaultTransportFactory))
    }

    pub fn with_factory(
        config: ServerConfig,
        settings: ClientSettings,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL);
        Self {
            shared: Arc::new(ClientShared {
                server_id: config.id.clone(),
                state: tokio::sync::Mutex::new(ClientState::default()),
                status: parking_lot::RwLock::new(ConnectionStatus::Disconnected),
                connected_at: parking_lot::RwLock::new(None),
                tools: parking_lot::RwLock::new(Vec::new()),
                events,
            }),
            config,
            settings,
            factory,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.server_id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribe to this client's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.read().clone()
    }

    /// When the current connection was established, if connected.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.shared.connected_at.read()
    }

    /// The tool list from the current connection. Empty when not
    /// connected.
    pub fn tools(&self) -> Vec<McpToolDef> {
        self.shared.tools.read().clone()
    }

    /// Spawn the server and run the MCP handshake.
    ///
    /// No-op when already connecting or connected. On any failure the
    /// client lands in the `error` state, the spawned process (if any)
    /// is killed, and a further `start` may be attempted.
    pub async fn start(&self) -> Result<(), McpError> {
        let mut state = self.shared.state.lock().await;

        match &*self.shared.status.read() {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => return Ok(()),
            _ => {}
        }

        self.shared.set_status(ConnectionStatus::Connecting);
        state.generation += 1;
        let generation = state.generation;

        tracing::info!(
            server_id = %self.shared.server_id,
            command = %self.config.command,
            "starting MCP server"
        );

        let transport: Arc<dyn McpTransport> = match self
            .factory
            .connect(&self.shared.server_id, &self.config, self.request_timeout())
            .await
        {
            Ok(transport) => Arc::from(transport),
            Err(e) => {
                self.fail_start(&mut state, None, &e.to_string()).await;
                return Err(McpError::Transport(e));
            }
        };

        // Watch for the process dying out from under us. Subscribed
        // before the handshake so no exit can slip through unseen.
        spawn_exit_watcher(self.shared.clone(), generation, transport.process_events());

        let tools = match self.handshake(&transport).await {
            Ok(tools) => tools,
            Err(e) => {
                self.fail_start(&mut state, Some(&transport), &e.to_string())
                    .await;
                return Err(e);
            }
        };

        state.transport = Some(transport);
        *self.shared.tools.write() = tools.clone();
        *self.shared.connected_at.write() = Some(Utc::now());
        self.shared.set_status(ConnectionStatus::Connected);
        self.shared.emit(McpEvent::ToolsUpdated { tools });
        self.shared.emit(McpEvent::Connected);
        Ok(())
    }

    /// Disconnect from the server.
    ///
    /// No-op when already disconnected. A connected server gets a
    /// best-effort `shutdown` request before its process is killed;
    /// requests still in flight are failed.
    pub async fn stop(&self) {
        let mut state = self.shared.state.lock().await;

        if matches!(&*self.shared.status.read(), ConnectionStatus::Disconnected) {
            return;
        }

        if let Some(transport) = &state.transport {
            // Farewell is queued but never awaited; the server may act
            // on it or not before the kill lands.
            let _ = transport.post_request("shutdown", None).await;
        }

        self.shared.clear_connection(&mut state).await;
        self.shared.set_status(ConnectionStatus::Disconnected);
        self.shared.emit(McpEvent::Disconnected {
            reason: "stopped".into(),
        });
        tracing::info!(server_id = %self.shared.server_id, "MCP server stopped");
    }

    /// Invoke a tool on the connected server.
    ///
    /// Fails fast with [`McpError::NotConnected`] when there is no
    /// live connection. A per-call server error rejects only this
    /// call; the connection stays up.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        // Clone the transport out so the state lock is not held across
        // the RPC; stop() stays callable while a call is in flight.
        let transport = {
            let state = self.shared.state.lock().await;
            if !self.shared.status.read().is_connected() {
                return Err(McpError::NotConnected);
            }
            state.transport.clone().ok_or(McpError::NotConnected)?
        };

        tracing::debug!(server_id = %self.shared.server_id, tool, "calling MCP tool");
        let response = transport
            .send_request("tools/call", Some(tool_call_params(tool, arguments)))
            .await?;
        let value = response.into_result().map_err(McpError::from)?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {e}")))
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.config
                .request_timeout_ms
                .unwrap_or(self.settings.request_timeout_ms),
        )
    }

    /// Run the MCP handshake: `initialize`, the `initialized`
    /// notification, then tool discovery. Connected means all three
    /// succeeded.
    async fn handshake(&self, transport: &Arc<dyn McpTransport>) -> Result<Vec<McpToolDef>, McpError> {
        let server_id = &self.shared.server_id;

        let params = serde_json::to_value(initialize_params(&self.settings))
            .map_err(|e| McpError::Protocol(format!("failed to encode initialize params: {e}")))?;
        tracing::debug!(server_id = %server_id, "initializing MCP server");
        let response = transport.send_request("initialize", Some(params)).await?;
        let init: InitializeResult = match response.into_result() {
            // Tolerate nonstandard result shapes; only the handshake
            // outcome matters, the payload is informational.
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(err) => return Err(McpError::from(err)),
        };
        if !init.protocol_version.is_empty() && init.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                server_id = %server_id,
                server_protocol = %init.protocol_version,
                "MCP server speaks a different protocol revision"
            );
        }

        transport
            .send_notification("notifications/initialized", None)
            .await?;

        tracing::debug!(server_id = %server_id, "requesting tool list");
        let response = transport
            .send_request("tools/list", Some(serde_json::json!({})))
            .await?;
        let value = response.into_result().map_err(McpError::from)?;
        let list: ToolsListResult = serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {e}")))?;

        tracing::info!(
            server_id = %server_id,
            server_name = %init.server_info.name,
            tool_count = list.tools.len(),
            "MCP server ready"
        );
        Ok(list.tools)
    }

    async fn fail_start(
        &self,
        state: &mut ClientState,
        transport: Option<&Arc<dyn McpTransport>>,
        message: &str,
    ) {
        tracing::warn!(
            server_id = %self.shared.server_id,
            error = %message,
            "failed to start MCP server"
        );
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        self.shared.clear_connection(state).await;
        self.shared.set_status(ConnectionStatus::Error {
            message: message.to_owned(),
        });
        self.shared.emit(McpEvent::Error {
            message: message.to_owned(),
        });
    }
}

impl ClientShared {
    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    fn emit(&self, event: McpEvent) {
        let _ = self.events.send(event);
    }

    /// Drop the current transport and connection-scoped state. The
    /// generation bump invalidates any exit watcher still out there.
    /// The caller sets the next status and emits.
    async fn clear_connection(&self, state: &mut ClientState) {
        if let Some(transport) = state.transport.take() {
            transport.shutdown().await;
        }
        state.generation += 1;
        self.tools.write().clear();
        *self.connected_at.write() = None;
    }

    async fn handle_unsolicited_exit(&self, generation: u64, event: ProcessEvent) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            // A newer connection or an explicit stop superseded this
            // watcher.
            return;
        }
        if !self.status.read().is_connected() {
            return;
        }

        let reason = event.describe();
        tracing::warn!(
            server_id = %self.server_id,
            reason = %reason,
            "MCP server exited unexpectedly"
        );

        self.clear_connection(&mut state).await;
        self.set_status(ConnectionStatus::Disconnected);
        self.emit(McpEvent::Disconnected { reason });
    }
}

fn spawn_exit_watcher(
    shared: Arc<ClientShared>,
    generation: u64,
    mut events: broadcast::Receiver<ProcessEvent>,
) {
    tokio::spawn(async move {
        // A closed or lagged feed carries nothing to act on.
        let Ok(event) = events.recv().await else { return };
        shared.handle_unsolicited_exit(generation, event).await;
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
