//! [`ServerRpc`] over the stdio transport: a server-initiated call is
//! written straight onto stdout as its own JSON-RPC request line and
//! resolved when a matching response line comes back in off stdin.

use std::sync::Arc;

use async_trait::async_trait;
use ferrite_mcp_core::{McpError, McpResult, ServerRpc, SessionId};
use ferrite_mcp_protocol::correlation::CORRELATION_TIMEOUT;
use ferrite_mcp_protocol::PendingRequests;
use ferrite_mcp_server::SessionManager;
use ferrite_mcp_types::ClientCapabilities;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Unlike the streamable HTTP transport, where each session has its own
/// `pending_requests` table capped only by how many SSE streams a client
/// keeps open, stdio is a single pipe shared by every outstanding
/// server-initiated call. A runaway handler that keeps asking for
/// sampling without the client ever answering would otherwise grow this
/// table without bound.
pub(crate) const MAX_OUTSTANDING_SERVER_REQUESTS: usize = 100;

/// The sentinel key a client error response is translated to before being
/// delivered through the (always-`Value`) pending-request channel, so
/// `request_response` can tell a client-reported failure apart from a
/// genuine result of `null`. Mirrors the streamable HTTP transport's own
/// `respond_error_value` convention.
const RESPOND_ERROR_KEY: &str = "__respond_error__";

pub(crate) fn respond_error_value(message: impl Into<String>) -> Value {
    json!({ RESPOND_ERROR_KEY: message.into() })
}

pub(crate) struct StdioServerRpc {
    pub(crate) session_id: SessionId,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) out_tx: mpsc::UnboundedSender<String>,
}

impl StdioServerRpc {
    fn require_capability(&self, check: impl Fn(&ClientCapabilities) -> bool, name: &str) -> McpResult<()> {
        let granted = self
            .sessions
            .with_session(&self.session_id, |session| check(&session.client_capabilities))
            .unwrap_or(false);
        if granted {
            Ok(())
        } else {
            Err(McpError::CapabilityUnavailable(name.to_string()))
        }
    }

    async fn request_response(&self, method: &str, params: Value) -> McpResult<Value> {
        if self.pending.outstanding_count() >= MAX_OUTSTANDING_SERVER_REQUESTS {
            return Err(McpError::Internal(format!(
                "transport backpressure: {MAX_OUTSTANDING_SERVER_REQUESTS} server-initiated requests already outstanding"
            )));
        }

        let (id, pending) = self.pending.register();
        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let line = serde_json::to_string(&frame).map_err(|e| McpError::Internal(e.to_string()))?;
        let _ = self.out_tx.send(line);

        let value = pending
            .wait()
            .await
            .map_err(|_| McpError::TransportTimeout(CORRELATION_TIMEOUT.as_millis() as u64))?;
        match value.get(RESPOND_ERROR_KEY).and_then(Value::as_str) {
            Some(message) => Err(McpError::Internal(message.to_string())),
            None => Ok(value),
        }
    }

    fn notify(&self, method: &str, params: Value) {
        let frame = json!({"jsonrpc": "2.0", "method": method, "params": params});
        if let Ok(line) = serde_json::to_string(&frame) {
            let _ = self.out_tx.send(line);
        }
    }
}

#[async_trait]
impl ServerRpc for StdioServerRpc {
    async fn create_message(&self, request: Value) -> McpResult<Value> {
        self.require_capability(ClientCapabilities::supports_sampling, "sampling")?;
        self.request_response("sampling/createMessage", request).await
    }

    async fn create_elicitation(&self, message: String, schema: Value) -> McpResult<Value> {
        self.require_capability(ClientCapabilities::supports_elicitation, "elicitation")?;
        self.request_response(
            "elicitation/create",
            json!({"message": message, "requestedSchema": schema}),
        )
        .await
    }

    async fn elicit_url(&self, url: String, description: String) -> McpResult<Value> {
        self.require_capability(ClientCapabilities::supports_elicitation, "elicitation")?;
        self.request_response(
            "elicitation/create",
            json!({"mode": "url", "url": url, "description": description}),
        )
        .await
    }

    async fn list_roots(&self) -> McpResult<Value> {
        self.require_capability(ClientCapabilities::supports_roots, "roots")?;
        self.request_response("roots/list", Value::Null).await
    }

    async fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        let mut params = json!({"progress": progress});
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        if let Some(message) = message {
            params["message"] = json!(message);
        }
        self.notify("notifications/progress", params);
    }
}

/// The process-wide slot holding the one session stdio ever has. `None`
/// until `initialize` completes; cleared only when the transport exits.
pub(crate) type CurrentSession = Arc<Mutex<Option<SessionId>>>;
