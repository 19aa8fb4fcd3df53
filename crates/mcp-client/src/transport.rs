//! MCP transport layer.
//!
//! Each MCP server communicates over a transport. Currently supported:
//! - **Stdio**: spawn a child process, send JSON-RPC over stdin/stdout.
//! - **Sse**: stub for future HTTP SSE transport.
//!
//! The stdio transport runs two background tasks: a writer draining an
//! outbound queue into the child's stdin, and a reader framing stdout
//! into lines and settling responses through the
//! [`RequestCorrelator`]. Callers may therefore have any number of
//! requests in flight at once; responses are matched by id, not by
//! arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use tether_domain::config::{ServerConfig, TransportKind};

use crate::correlator::RequestCorrelator;
use crate::framer::LineFramer;
use crate::process::{self, ProcessEvent, ProcessHandle};
use crate::protocol::{InboundMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC request without waiting for its response.
    ///
    /// Best-effort: the request is queued for writing and any eventual
    /// reply is dropped as unmatched.
    async fn post_request(&self, method: &str, params: Option<Value>)
        -> Result<(), TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError>;

    /// Check if the transport is still alive.
    fn is_alive(&self) -> bool;

    /// Subscribe to lifecycle events of the underlying process.
    fn process_events(&self) -> broadcast::Receiver<ProcessEvent>;

    /// Tear down the transport: stop its tasks, kill the process if
    /// one is attached, and fail every request still in flight.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to spawn \"{command}\": {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("connection closed")]
    Closed,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("transport not supported: {0}")]
    Unsupported(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds a transport for a server config.
///
/// The default implementation spawns real processes; tests substitute
/// in-memory transports through this seam.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        server_id: &str,
        config: &ServerConfig,
        request_timeout: Duration,
    ) -> Result<Box<dyn McpTransport>, TransportError>;
}

/// Default factory: stdio spawns a child process, SSE is stubbed.
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(
        &self,
        server_id: &str,
        config: &ServerConfig,
        request_timeout: Duration,
    ) -> Result<Box<dyn McpTransport>, TransportError> {
        match config.transport {
            TransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(
                server_id,
                config,
                request_timeout,
            )?)),
            TransportKind::Sse => {
                tracing::warn!(
                    server_id = %server_id,
                    "SSE transport is not yet implemented; server will be non-functional"
                );
                Ok(Box::new(SseTransport::new()))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Depth of the outbound write queue.
const OUTBOUND_QUEUE: usize = 64;

/// Stdio transport: speaks newline-delimited JSON-RPC over a pair of
/// byte streams, normally the stdin/stdout of a spawned child process.
pub struct StdioTransport {
    server_id: String,
    outbound_tx: mpsc::Sender<String>,
    correlator: Arc<RequestCorrelator>,
    request_timeout: Duration,
    alive: Arc<AtomicBool>,
    events: broadcast::Sender<ProcessEvent>,
    handle: Option<ProcessHandle>,
    tasks: CancellationToken,
}

impl StdioTransport {
    /// Spawn a child process from the given server config and attach a
    /// transport to its stdio.
    pub fn spawn(
        server_id: &str,
        config: &ServerConfig,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let spawned = process::spawn_server(server_id, config)?;
        let events = spawned.handle.events.clone();
        let transport = Self::wire(
            server_id,
            spawned.stdin,
            spawned.stdout,
            events,
            Some(spawned.handle),
            request_timeout,
        );
        transport.spawn_stderr_logger(spawned.stderr);
        Ok(transport)
    }

    /// Attach a transport to an arbitrary reader/writer pair.
    ///
    /// There is no process behind it, so end-of-stream on `reader` is
    /// reported as an exit event. Used by tests and by embedders that
    /// manage the server process themselves.
    pub fn from_io<R, W>(server_id: &str, reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events, _) = broadcast::channel(8);
        Self::wire(server_id, writer, reader, events, None, request_timeout)
    }

    fn wire<R, W>(
        server_id: &str,
        writer: W,
        reader: R,
        events: broadcast::Sender<ProcessEvent>,
        handle: Option<ProcessHandle>,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let correlator = Arc::new(RequestCorrelator::new());
        let alive = Arc::new(AtomicBool::new(true));
        let tasks = CancellationToken::new();

        // Without a process monitor, the read loop is the only place
        // that can observe the peer going away.
        let eof_events = handle.is_none().then(|| events.clone());

        spawn_writer_loop(
            server_id.to_owned(),
            writer,
            outbound_rx,
            alive.clone(),
            tasks.clone(),
        );
        spawn_read_loop(
            server_id.to_owned(),
            reader,
            correlator.clone(),
            alive.clone(),
            eof_events,
            tasks.clone(),
        );

        Self {
            server_id: server_id.to_owned(),
            outbound_tx,
            correlator,
            request_timeout,
            alive,
            events,
            handle,
            tasks,
        }
    }

    /// Forward child stderr to our logs, tagged with the server id.
    fn spawn_stderr_logger(&self, stderr: tokio::process::ChildStderr) {
        let server_id = self.server_id.clone();
        let cancel = self.tasks.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            tracing::debug!(server_id = %server_id, line = %line, "MCP server stderr");
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        });
    }

    async fn enqueue(&self, json: String) -> Result<(), TransportError> {
        self.outbound_tx
            .send(json)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let (id, response_rx) = self.correlator.register();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(server_id = %self.server_id, id, method, "sending MCP request");
        if let Err(e) = self.enqueue(json).await {
            self.correlator.forget(id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the read loop or shutdown aborted us.
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.correlator.forget(id);
                tracing::warn!(
                    server_id = %self.server_id,
                    id,
                    method,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "MCP request timed out"
                );
                Err(TransportError::Timeout)
            }
        }
    }

    async fn post_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        // A real id keeps the wire well-formed, but no pending slot is
        // registered: a reply would be dropped as unmatched.
        let id = self.correlator.allocate_id();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;
        tracing::debug!(server_id = %self.server_id, id, method, "posting MCP request");
        self.enqueue(json).await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let notif = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(server_id = %self.server_id, method, "sending MCP notification");
        self.enqueue(json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn process_events(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.tasks.cancel();
        if let Some(handle) = &self.handle {
            handle.kill();
        }
        let aborted = self.correlator.abort_all();
        if aborted > 0 {
            tracing::debug!(
                server_id = %self.server_id,
                aborted,
                "aborted in-flight requests during shutdown"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background loops
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_writer_loop<W>(
    server_id: String,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<String>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        loop {
            // Biased toward the queue so lines enqueued just before a
            // shutdown (the best-effort `shutdown` request) still get
            // written.
            tokio::select! {
                biased;
                maybe = outbound_rx.recv() => {
                    let Some(line) = maybe else { break };
                    if let Err(e) = write_line(&mut writer, &line).await {
                        tracing::warn!(server_id = %server_id, error = %e, "failed to write to MCP server stdin");
                        alive.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        // Closing stdin tells well-behaved servers to exit.
        let _ = writer.shutdown().await;
    });
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

fn spawn_read_loop<R>(
    server_id: String,
    mut reader: R,
    correlator: Arc<RequestCorrelator>,
    alive: Arc<AtomicBool>,
    eof_events: Option<broadcast::Sender<ProcessEvent>>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut framer = LineFramer::new();
        let mut chunk = [0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => {
                        tracing::debug!(server_id = %server_id, "MCP server stdout closed");
                        break;
                    }
                    Ok(n) => {
                        for line in framer.push(&chunk[..n]) {
                            dispatch_line(&server_id, &correlator, &line);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(server_id = %server_id, error = %e, "error reading MCP server stdout");
                        break;
                    }
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        let aborted = correlator.abort_all();
        if aborted > 0 {
            tracing::debug!(server_id = %server_id, aborted, "aborted in-flight requests on stream end");
        }
        if let Some(events) = eof_events {
            let _ = events.send(ProcessEvent::Exited {
                code: None,
                signal: None,
            });
        }
    });
}

/// Decode one framed line and route it.
///
/// Malformed JSON, unmatched response ids, server notifications and
/// server-to-client requests are all logged and dropped; none of them
/// may take the connection down.
fn dispatch_line(server_id: &str, correlator: &RequestCorrelator, line: &str) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(server_id = %server_id, error = %e, "dropping malformed line from MCP server");
            return;
        }
    };

    match InboundMessage::classify(value) {
        Some(InboundMessage::Response(response)) => {
            let id = response.id;
            if !correlator.settle(response) {
                tracing::debug!(
                    server_id = %server_id,
                    id,
                    "response matched no pending request, ignoring"
                );
            }
        }
        Some(InboundMessage::Notification { method, .. }) => {
            tracing::debug!(server_id = %server_id, method = %method, "ignoring MCP server notification");
        }
        Some(InboundMessage::Request { method, .. }) => {
            tracing::debug!(
                server_id = %server_id,
                method = %method,
                "ignoring unsupported server-to-client request"
            );
        }
        None => {
            tracing::warn!(server_id = %server_id, "dropping message with no usable id or method");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE transport (stub)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stub SSE transport. Not yet implemented.
pub struct SseTransport {
    events: broadcast::Sender<ProcessEvent>,
}

impl SseTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send_request(
        &self,
        _method: &str,
        _params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        Err(TransportError::Unsupported(
            "SSE transport is not yet implemented".into(),
        ))
    }

    async fn post_request(
        &self,
        _method: &str,
        _params: Option<Value>,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "SSE transport is not yet implemented".into(),
        ))
    }

    async fn send_notification(
        &self,
        _method: &str,
        _params: Option<Value>,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "SSE transport is not yet implemented".into(),
        ))
    }

    fn is_alive(&self) -> bool {
        false
    }

    fn process_events(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{ReadHalf, WriteHalf};

    type Peer = (
        tokio::io::Lines<BufReader<ReadHalf<tokio::io::DuplexStream>>>,
        WriteHalf<tokio::io::DuplexStream>,
    );

    fn pipe(timeout: Duration) -> (StdioTransport, Peer) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (our_read, our_write) = tokio::io::split(ours);
        let transport = StdioTransport::from_io("test", our_read, our_write, timeout);

        let (peer_read, peer_write) = tokio::io::split(theirs);
        (transport, (BufReader::new(peer_read).lines(), peer_write))
    }

    async fn reply(writer: &mut WriteHalf<tokio::io::DuplexStream>, raw: &str) {
        writer.write_all(raw.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
    }

    #[tokio::test]
    async fn request_round_trip() {
        let (transport, (mut lines, mut writer)) = pipe(Duration::from_secs(5));

        let peer = tokio::spawn(async move {
            let line = lines.next_line().await.unwrap().unwrap();
            let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
            assert_eq!(req.method, "tools/list");
            reply(
                &mut writer,
                &format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"tools":[]}}}}"#, req.id),
            )
            .await;
            (lines, writer)
        });

        let response = transport.send_request("tools/list", None).await.unwrap();
        assert!(!response.is_error());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_requests_settle_out_of_order() {
        let (transport, (mut lines, mut writer)) = pipe(Duration::from_secs(5));
        let transport = Arc::new(transport);

        let peer = tokio::spawn(async move {
            let first = lines.next_line().await.unwrap().unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            let first: JsonRpcRequest = serde_json::from_str(&first).unwrap();
            let second: JsonRpcRequest = serde_json::from_str(&second).unwrap();
            // Answer in reverse order of arrival.
            reply(
                &mut writer,
                &format!(r#"{{"jsonrpc":"2.0","id":{},"result":"second"}}"#, second.id),
            )
            .await;
            reply(
                &mut writer,
                &format!(r#"{{"jsonrpc":"2.0","id":{},"result":"first"}}"#, first.id),
            )
            .await;
        });

        let a = {
            let t = transport.clone();
            tokio::spawn(async move { t.send_request("alpha", None).await })
        };
        let b = {
            let t = transport.clone();
            tokio::spawn(async move { t.send_request("beta", None).await })
        };

        let a = a.await.unwrap().unwrap().into_result().unwrap();
        let b = b.await.unwrap().unwrap().into_result().unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_forgets_the_request() {
        let (transport, (_lines, _writer)) = pipe(Duration::from_millis(200));

        let err = transport.send_request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert_eq!(transport.correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn peer_close_fails_pending_and_reports_exit() {
        let (transport, (lines, writer)) = pipe(Duration::from_secs(5));
        let transport = Arc::new(transport);
        let mut events = transport.process_events();

        let t = transport.clone();
        let call = tokio::spawn(async move { t.send_request("tools/list", None).await });
        // Let the request get registered before closing the peer.
        tokio::task::yield_now().await;
        drop((lines, writer));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(matches!(
            events.recv().await.unwrap(),
            ProcessEvent::Exited { code: None, .. }
        ));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn malformed_and_interleaved_lines_are_skipped() {
        let (transport, (mut lines, mut writer)) = pipe(Duration::from_secs(5));

        let peer = tokio::spawn(async move {
            let line = lines.next_line().await.unwrap().unwrap();
            let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
            reply(&mut writer, "not json at all").await;
            reply(&mut writer, r#"{"jsonrpc":"2.0","method":"notifications/noise"}"#).await;
            reply(&mut writer, r#"{"jsonrpc":"2.0","id":9999,"result":"stray"}"#).await;
            reply(
                &mut writer,
                &format!(r#"{{"jsonrpc":"2.0","id":{},"result":"real"}}"#, req.id),
            )
            .await;
            (lines, writer)
        });

        let value = transport
            .send_request("tools/list", None)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(value, "real");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn post_request_registers_no_pending_slot() {
        let (transport, (mut lines, _writer)) = pipe(Duration::from_secs(5));

        transport.post_request("shutdown", None).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(req.method, "shutdown");
        assert_eq!(transport.correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn notification_has_no_id() {
        let (transport, (mut lines, _writer)) = pipe(Duration::from_secs(5));

        transport
            .send_notification("notifications/initialized", None)
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn shutdown_fails_in_flight_requests() {
        let (transport, (_lines, _writer)) = pipe(Duration::from_secs(30));
        let transport = Arc::new(transport);

        let t = transport.clone();
        let call = tokio::spawn(async move { t.send_request("tools/call", None).await });
        // Let the request get registered before tearing down.
        tokio::task::yield_now().await;
        transport.shutdown().await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            TransportError::Closed | TransportError::ProcessExited
        ));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn requests_after_shutdown_fail_fast() {
        let (transport, _peer) = pipe(Duration::from_secs(5));
        transport.shutdown().await;
        let err = transport.send_request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, TransportError::ProcessExited));
    }

    #[tokio::test]
    async fn sse_transport_is_unsupported() {
        let transport = SseTransport::new();
        let err = transport.send_request("initialize", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
        assert!(!transport.is_alive());
    }
}
