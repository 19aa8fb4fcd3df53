//! In-memory fakes for exercising the client and manager without
//! spawning processes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tether_domain::config::ServerConfig;

use crate::process::ProcessEvent;
use crate::protocol::{JsonRpcError, JsonRpcResponse, McpToolDef, PROTOCOL_VERSION};
use crate::transport::{McpTransport, TransportError, TransportFactory};

pub(crate) fn tool_def(name: &str) -> McpToolDef {
    McpToolDef {
        name: name.into(),
        description: format!("fake tool {name}"),
        input_schema: serde_json::json!({ "type": "object", "properties": {} }),
    }
}

/// Canned behavior for a [`FakeTransport`].
#[derive(Clone, Default)]
pub(crate) struct FakeScript {
    /// Tools served by `tools/list`.
    pub tools: Vec<McpToolDef>,
    /// Reply to `initialize` with this error message.
    pub initialize_error: Option<String>,
    /// Reply to `tools/list` with this error message.
    pub tools_list_error: Option<String>,
    /// Per-tool raw results for `tools/call`.
    pub call_results: HashMap<String, Value>,
    /// Per-tool error messages for `tools/call`.
    pub call_errors: HashMap<String, String>,
    /// Methods that never answer until the transport shuts down.
    pub hang_methods: HashSet<String>,
    /// Make the factory fail before a transport is even built.
    pub connect_error: Option<String>,
}

/// Scriptable in-memory [`McpTransport`].
#[derive(Clone)]
pub(crate) struct FakeTransport {
    inner: Arc<FakeInner>,
}

struct FakeInner {
    script: FakeScript,
    alive: AtomicBool,
    cancel: CancellationToken,
    next_id: AtomicU64,
    requests: Mutex<Vec<String>>,
    notifications: Mutex<Vec<String>>,
    posted: Mutex<Vec<String>>,
    events: broadcast::Sender<ProcessEvent>,
}

impl FakeTransport {
    pub fn new(script: FakeScript) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            inner: Arc::new(FakeInner {
                script,
                alive: AtomicBool::new(true),
                cancel: CancellationToken::new(),
                next_id: AtomicU64::new(0),
                requests: Mutex::new(Vec::new()),
                notifications: Mutex::new(Vec::new()),
                posted: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Methods sent via `send_request`, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner.requests.lock().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.inner.notifications.lock().clone()
    }

    pub fn posted(&self) -> Vec<String> {
        self.inner.posted.lock().clone()
    }

    /// Simulate the server process dying.
    pub fn emit_exit(&self, code: Option<i32>) {
        self.inner.alive.store(false, Ordering::SeqCst);
        let _ = self
            .inner
            .events
            .send(ProcessEvent::Exited { code, signal: None });
    }

    fn ok_response(&self, result: Value) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            result: Some(result),
            error: None,
        }
    }

    fn err_response(&self, code: i64, message: &str) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        self.inner.requests.lock().push(method.to_owned());

        if self.inner.script.hang_methods.contains(method) {
            self.inner.cancel.cancelled().await;
            return Err(TransportError::Closed);
        }

        let script = &self.inner.script;
        let response = match method {
            "initialize" => match &script.initialize_error {
                Some(message) => self.err_response(-32600, message),
                None => self.ok_response(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": { "name": "fake-server", "version": "0.0.0" },
                })),
            },
            "tools/list" => match &script.tools_list_error {
                Some(message) => self.err_response(-32603, message),
                None => self.ok_response(serde_json::json!({ "tools": script.tools })),
            },
            "tools/call" => {
                let tool = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                if let Some(message) = script.call_errors.get(&tool) {
                    self.err_response(-32000, message)
                } else if let Some(result) = script.call_results.get(&tool) {
                    self.ok_response(result.clone())
                } else {
                    self.ok_response(serde_json::json!({
                        "content": [],
                        "isError": false,
                    }))
                }
            }
            other => self.err_response(-32601, &format!("method not found: {other}")),
        };
        Ok(response)
    }

    async fn post_request(
        &self,
        method: &str,
        _params: Option<Value>,
    ) -> Result<(), TransportError> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        self.inner.posted.lock().push(method.to_owned());
        Ok(())
    }

    async fn send_notification(
        &self,
        method: &str,
        _params: Option<Value>,
    ) -> Result<(), TransportError> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        self.inner.notifications.lock().push(method.to_owned());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    fn process_events(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    async fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
    }
}

/// Factory producing [`FakeTransport`]s and remembering what it built.
pub(crate) struct FakeFactory {
    script: Mutex<FakeScript>,
    by_server: Mutex<HashMap<String, FakeScript>>,
    transports: Mutex<Vec<FakeTransport>>,
    last_timeout: Mutex<Option<Duration>>,
}

impl FakeFactory {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script: Mutex::new(script),
            by_server: Mutex::new(HashMap::new()),
            transports: Mutex::new(Vec::new()),
            last_timeout: Mutex::new(None),
        }
    }

    /// Replace the default script used for future connections.
    pub fn set_script(&self, script: FakeScript) {
        *self.script.lock() = script;
    }

    /// Script one server's connections specifically; other servers
    /// keep the default script.
    pub fn set_script_for(&self, server_id: &str, script: FakeScript) {
        self.by_server.lock().insert(server_id.to_owned(), script);
    }

    /// The most recently built transport.
    pub fn latest(&self) -> FakeTransport {
        self.transports
            .lock()
            .last()
            .cloned()
            .expect("no transport was built")
    }

    /// How many transports have been built.
    pub fn built(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn connect(
        &self,
        server_id: &str,
        config: &ServerConfig,
        request_timeout: Duration,
    ) -> Result<Box<dyn McpTransport>, TransportError> {
        *self.last_timeout.lock() = Some(request_timeout);
        let script = self
            .by_server
            .lock()
            .get(server_id)
            .cloned()
            .unwrap_or_else(|| self.script.lock().clone());
        if let Some(message) = &script.connect_error {
            return Err(TransportError::Spawn {
                command: config.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message.clone()),
            });
        }
        let transport = FakeTransport::new(script);
        self.transports.lock().push(transport.clone());
        Ok(Box::new(transport))
    }
}
