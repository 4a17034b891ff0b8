//! Newline-delimited JSON transport: one complete JSON-RPC message per
//! line of stdin, one complete JSON-RPC message per line of stdout.
//! Stdout is the wire — nothing but message lines may ever be written to
//! it, so all logging from a process using this transport belongs on
//! stderr.
//!
//! Unlike the streamable HTTP transport, which juggles many sessions at
//! once, a stdio process has exactly one: the client on the other end of
//! the pipe. That session comes into being the moment `initialize`
//! completes and lives for the process's whole lifetime. The same duplex
//! pipe carries client requests, client notifications, client responses
//! to our own server-initiated RPCs, and our responses/notifications
//! back — all multiplexed by inspecting each line's shape.

mod error;
mod rpc;

pub use error::StdioError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferrite_mcp_core::{Context, McpError, SessionId, TaskId};
use ferrite_mcp_protocol::engine::ParsedInbound;
use ferrite_mcp_protocol::{Engine, PendingRequests};
use ferrite_mcp_server::task::TaskStatus;
use ferrite_mcp_server::{Dispatcher, HandlerRegistry, ServerConfig, SessionManager, TaskManager};
use ferrite_mcp_types::{JsonRpcError, JsonRpcMessage, JsonRpcResponse, JsonRpcResponsePayload, ResponseId};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{info, warn};

use crate::rpc::{respond_error_value, CurrentSession, StdioServerRpc};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static NOTIFICATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A stable string to key cancellation/tracing on, mirroring the
/// streamable HTTP transport's own `request_id_string`.
fn request_id_string(message: &JsonRpcMessage) -> String {
    match &message.id {
        Some(id) => id.to_string(),
        None => format!("notify-{}", NOTIFICATION_COUNTER.fetch_add(1, Ordering::Relaxed)),
    }
}

/// Owns the protocol engine and the server-layer managers it drives, and
/// runs the stdin/stdout multiplexing loop.
pub struct StdioTransport {
    engine: Engine<Arc<Dispatcher>>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskManager>,
    #[allow(dead_code)]
    registry: Arc<HandlerRegistry>,
    config: Arc<ServerConfig>,
}

impl StdioTransport {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionManager>,
        tasks: Arc<TaskManager>,
        registry: Arc<HandlerRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let engine = Engine::new(dispatcher.clone(), config.max_message_bytes);
        Self {
            engine,
            dispatcher,
            sessions,
            tasks,
            registry,
            config,
        }
    }

    /// Read lines from stdin until it closes, dispatching each
    /// concurrently, then drain in-flight work before returning.
    pub async fn serve(self: Arc<Self>) -> Result<(), StdioError> {
        self.run_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// The actual multiplexing loop, generic over the byte streams so
    /// tests can drive it over an in-memory duplex pipe instead of the
    /// real stdin/stdout.
    async fn run_io<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<(), StdioError>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = FramedRead::new(reader, LinesCodec::new());
        let mut writer = FramedWrite::new(writer, LinesCodec::new());

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let pending = Arc::new(PendingRequests::new());
        let current_session: CurrentSession = Arc::new(parking_lot::Mutex::new(None));

        let status_out_tx = out_tx.clone();
        self.tasks
            .set_on_status_change(Arc::new(move |_session_id: &SessionId, task_id: &TaskId, status: TaskStatus| {
                let notification = serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/tasks/status",
                    "params": {"taskId": task_id.as_str(), "status": status},
                });
                if let Ok(line) = serde_json::to_string(&notification) {
                    let _ = status_out_tx.send(line);
                }
            }));

        info!("stdio transport ready");

        loop {
            tokio::select! {
                line = reader.next() => {
                    match line {
                        Some(Ok(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if Self::needs_background_task(&line) {
                                // A request's handler may itself turn around and
                                // ask the client for sampling/elicitation/roots,
                                // which resolves only when *this* loop reads the
                                // client's answer off the same pipe. Running the
                                // dispatch inline would deadlock that wait
                                // against the very read it's blocking.
                                let transport = self.clone();
                                let out_tx = out_tx.clone();
                                let pending = pending.clone();
                                let current_session = current_session.clone();
                                tokio::spawn(async move {
                                    transport.handle_line(line, out_tx, pending, current_session).await;
                                });
                            } else {
                                // Notifications, client responses to our own
                                // requests, and malformed lines all finish
                                // without needing anything further off the
                                // wire — handling them inline keeps them
                                // strictly ordered against whatever line
                                // follows (the handshake's `notifications/
                                // initialized` must land before the next
                                // request is dispatched).
                                self.handle_line(line, out_tx.clone(), pending.clone(), current_session.clone()).await;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(%err, "malformed line on stdin, continuing");
                        }
                        None => break,
                    }
                }
                Some(out_line) = out_rx.recv() => {
                    if let Err(err) = writer.send(out_line).await {
                        warn!(%err, "failed writing to stdout, stopping transport");
                        break;
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Stop admitting new dispatches, wait for in-flight tool calls to
    /// finish on their own up to the configured timeout, then force-cancel
    /// whatever's left and drop the session.
    pub async fn drain(&self) {
        info!("draining: no longer accepting new dispatches");
        self.dispatcher.begin_drain();

        let deadline = std::time::Instant::now() + self.config.shutdown_timeout;
        while self.tasks.in_flight_count() > 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let survivors = self.tasks.in_flight_ids();
        if !survivors.is_empty() {
            warn!(count = survivors.len(), "cancelling tasks that outlived the shutdown timeout");
            for id in &survivors {
                let _ = self.tasks.cancel(id);
            }
        }

        self.sessions.clear();
        info!("drain complete");
    }

    /// Cheap shape probe deciding whether a line needs its own background
    /// task: true only for a genuine client *request* (has both `method`
    /// and `id`, i.e. it isn't a response to one of our own server-
    /// initiated calls). Notifications and client responses never block
    /// on further input, so they're processed inline without the spawn.
    fn needs_background_task(line: &str) -> bool {
        let Ok(probe) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        let is_response = probe.get("method").is_none()
            && probe.get("id").is_some()
            && (probe.get("result").is_some() || probe.get("error").is_some());
        !is_response && probe.get("id").is_some()
    }

    async fn handle_line(
        &self,
        line: String,
        out_tx: mpsc::UnboundedSender<String>,
        pending: Arc<PendingRequests>,
        current_session: CurrentSession,
    ) {
        let probe: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                self.send_parse_error(&out_tx, McpError::ParseError(err.to_string()));
                return;
            }
        };

        let is_client_response = probe.get("method").is_none()
            && probe.get("id").is_some()
            && (probe.get("result").is_some() || probe.get("error").is_some());

        if is_client_response {
            self.resolve_client_response(&probe, &pending);
            return;
        }

        let parsed = match self.engine.parse(line.as_bytes()) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.send_error_response(&out_tx, ResponseId::null(), err.to_jsonrpc_error());
                return;
            }
        };

        match parsed {
            ParsedInbound::Single(message) => {
                let request_id = request_id_string(&message);
                let session_id = current_session.lock().clone();
                let ctx = self.build_context(request_id, session_id, &pending, &out_tx);
                if let Some(response) = self.engine.handle_one(ctx, message).await {
                    self.capture_session(&response, &current_session);
                    self.send_response(&out_tx, &response);
                }
            }
            ParsedInbound::Batch(messages) => {
                let session_id = current_session.lock().clone();
                let contexts: Vec<Context> = messages
                    .iter()
                    .map(|m| self.build_context(request_id_string(m), session_id.clone(), &pending, &out_tx))
                    .collect();
                let responses = self.engine.handle_batch(contexts, messages).await;
                for response in &responses {
                    self.capture_session(response, &current_session);
                }
                for response in &responses {
                    self.send_response(&out_tx, response);
                }
            }
        }
    }

    fn resolve_client_response(&self, probe: &Value, pending: &Arc<PendingRequests>) {
        let Some(id) = probe.get("id").and_then(Value::as_str) else {
            warn!("dropping a client response with a non-string id");
            return;
        };
        let value = match probe.get("error") {
            Some(error) => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("client reported an error")
                    .to_string();
                respond_error_value(message)
            }
            None => probe.get("result").cloned().unwrap_or(Value::Null),
        };
        if pending.resolve(id, value).is_err() {
            warn!(id, "no pending server-initiated request with that id");
        }
    }

    fn build_context(
        &self,
        request_id: String,
        session_id: Option<SessionId>,
        pending: &Arc<PendingRequests>,
        out_tx: &mpsc::UnboundedSender<String>,
    ) -> Context {
        let ctx = Context::new(request_id, session_id.clone());
        match session_id {
            Some(session_id) => {
                let rpc = Arc::new(StdioServerRpc {
                    session_id,
                    sessions: self.sessions.clone(),
                    pending: pending.clone(),
                    out_tx: out_tx.clone(),
                });
                ctx.with_rpc(rpc)
            }
            // No session yet — only `initialize` itself runs without one,
            // and it never needs to sample or elicit mid-flight.
            None => ctx,
        }
    }

    /// `initialize`'s own response is the only place a session id is ever
    /// learned on this transport; remember it for every request after.
    fn capture_session(&self, response: &JsonRpcResponse, current_session: &CurrentSession) {
        if let JsonRpcResponsePayload::Success { result } = &response.payload {
            if let Some(session_id) = result.get("sessionId").and_then(Value::as_str) {
                *current_session.lock() = Some(SessionId::from(session_id));
            }
        }
    }

    fn send_response(&self, out_tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
        match serde_json::to_string(response) {
            Ok(line) => {
                let _ = out_tx.send(line);
            }
            Err(err) => warn!(%err, "failed to serialize outgoing response"),
        }
    }

    fn send_error_response(&self, out_tx: &mpsc::UnboundedSender<String>, id: ResponseId, error: JsonRpcError) {
        let response = JsonRpcResponse::error(id, error);
        self.send_response(out_tx, &response);
    }

    fn send_parse_error(&self, out_tx: &mpsc::UnboundedSender<String>, err: McpError) {
        let error = ferrite_mcp_protocol::Error::Core(err).to_jsonrpc_error();
        self.send_error_response(out_tx, ResponseId::null(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn transport() -> Arc<StdioTransport> {
        transport_with_registry(Arc::new(HandlerRegistry::new()))
    }

    fn transport_with_registry(registry: Arc<HandlerRegistry>) -> Arc<StdioTransport> {
        let sessions = Arc::new(SessionManager::new(10, Duration::from_secs(3600)));
        let tasks = Arc::new(TaskManager::new());
        let config = Arc::new(ServerConfig::default());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), tasks.clone(), config.clone()));
        Arc::new(StdioTransport::new(dispatcher, sessions, tasks, registry, config))
    }

    async fn write_line(writer: &mut (impl tokio::io::AsyncWrite + Unpin), line: &str) {
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        writer.flush().await.unwrap();
    }

    async fn read_line(reader: &mut (impl tokio::io::AsyncBufRead + Unpin)) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a response line")
            .unwrap();
        line
    }

    /// Wires a transport up to two duplex pipes: one the test writes
    /// requests into, one it reads responses from.
    fn spawn_transport() -> (
        tokio::task::JoinHandle<Result<(), StdioError>>,
        tokio::io::DuplexStream,
        BufReader<tokio::io::DuplexStream>,
    ) {
        spawn_transport_with(transport())
    }

    fn spawn_transport_with(
        transport: Arc<StdioTransport>,
    ) -> (
        tokio::task::JoinHandle<Result<(), StdioError>>,
        tokio::io::DuplexStream,
        BufReader<tokio::io::DuplexStream>,
    ) {
        let (client_writes, server_reads) = tokio::io::duplex(8192);
        let (server_writes, client_reads) = tokio::io::duplex(8192);
        let handle = tokio::spawn(transport.run_io(server_reads, server_writes));
        (handle, client_writes, BufReader::new(client_reads))
    }

    #[tokio::test]
    async fn ping_is_answered_without_a_session() {
        let (handle, mut to_server, mut from_server) = spawn_transport();

        write_line(&mut to_server, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await;
        let response = read_line(&mut from_server).await;
        assert!(response.contains("\"jsonrpc\":\"2.0\""));
        assert!(response.contains("\"id\":1"));

        drop(to_server);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn initialize_then_tools_list_round_trip() {
        let (handle, mut to_server, mut from_server) = spawn_transport();

        write_line(
            &mut to_server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-11-25","capabilities":{}}}"#,
        )
        .await;
        let init_response = read_line(&mut from_server).await;
        let init_value: Value = serde_json::from_str(&init_response).unwrap();
        assert!(init_value["result"]["sessionId"].is_string());

        write_line(&mut to_server, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        write_line(&mut to_server, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
        let list_response = read_line(&mut from_server).await;
        let list_value: Value = serde_json::from_str(&list_response).unwrap();
        assert!(list_value.get("error").is_none());

        drop(to_server);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_json_line_gets_a_null_id_error_response() {
        let (handle, mut to_server, mut from_server) = spawn_transport();

        write_line(&mut to_server, "not json at all").await;
        let response = read_line(&mut from_server).await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert!(value["id"].is_null());
        assert!(value.get("error").is_some());

        drop(to_server);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn long_running_tool_pushes_a_task_status_notification() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_tool(
                "slow_echo",
                &[],
                Arc::new(|_ctx: Context, _args| Box::pin(async move { Ok(serde_json::json!({"ok": true})) })),
                ferrite_mcp_server::ToolOptions {
                    long_running: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let (handle, mut to_server, mut from_server) = spawn_transport_with(transport_with_registry(registry));

        write_line(
            &mut to_server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-11-25","capabilities":{}}}"#,
        )
        .await;
        read_line(&mut from_server).await;
        write_line(&mut to_server, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;

        write_line(
            &mut to_server,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"slow_echo","arguments":{}}}"#,
        )
        .await;

        // The `working` acknowledgement and the completion notification
        // race against each other on the shared stdout channel; read both
        // without assuming which lands first.
        let first: Value = serde_json::from_str(&read_line(&mut from_server).await).unwrap();
        let second: Value = serde_json::from_str(&read_line(&mut from_server).await).unwrap();
        let (response, notification) = if first.get("result").is_some() {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(response["result"]["status"], "working");
        assert_eq!(notification["method"], "notifications/tasks/status");
        assert_eq!(notification["params"]["status"], "completed");

        drop(to_server);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn blank_lines_produce_no_output() {
        let (handle, mut to_server, mut from_server) = spawn_transport();

        write_line(&mut to_server, "").await;
        write_line(&mut to_server, "").await;
        write_line(&mut to_server, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await;
        let response = read_line(&mut from_server).await;
        assert!(response.contains("\"id\":1"));

        drop(to_server);
        handle.await.unwrap().unwrap();
    }
}
