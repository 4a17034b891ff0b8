//! [`ServerRpc`] over the streamable HTTP transport: a server-initiated
//! call is framed as an `event: server_request` SSE frame carrying a
//! `jsonrpc` envelope of its own, and resolved when the client later posts
//! its answer to `/mcp/respond`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::Event;
use ferrite_mcp_core::{McpError, McpResult, ServerRpc, SessionId};
use ferrite_mcp_protocol::correlation::CORRELATION_TIMEOUT;
use ferrite_mcp_protocol::PendingRequests;
use ferrite_mcp_server::SessionManager;
use ferrite_mcp_types::ClientCapabilities;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::sse::emit;

/// The sentinel key a `/mcp/respond` error payload is translated to before
/// being delivered through the (always-`Value`) pending-request channel,
/// so `request_response` can tell a client-reported failure apart from a
/// genuine result of `null`.
const RESPOND_ERROR_KEY: &str = "__respond_error__";

pub(crate) struct HttpServerRpc {
    pub(crate) session_id: SessionId,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) sender: mpsc::UnboundedSender<Event>,
}

impl HttpServerRpc {
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
        let (id, pending) = self.pending.register();
        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        emit(&self.sessions, &self.session_id, "server_request", &frame, &self.sender);

        let value = pending
            .wait()
            .await
            .map_err(|_| McpError::TransportTimeout(CORRELATION_TIMEOUT.as_millis() as u64))?;
        match value.get(RESPOND_ERROR_KEY).and_then(Value::as_str) {
            Some(message) => Err(McpError::Internal(message.to_string())),
            None => Ok(value),
        }
    }
}

#[async_trait]
impl ServerRpc for HttpServerRpc {
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
        let frame = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": params});
        emit(&self.sessions, &self.session_id, "server_notification", &frame, &self.sender);
    }
}

/// Build the error payload `/mcp/respond` hands back to a waiting
/// [`HttpServerRpc::request_response`] call when the client reports a
/// `error` object instead of a `result`.
pub(crate) fn respond_error_value(message: impl Into<String>) -> Value {
    json!({ RESPOND_ERROR_KEY: message.into() })
}
