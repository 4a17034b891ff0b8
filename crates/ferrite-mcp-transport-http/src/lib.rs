//! Streamable HTTP transport: a single `/mcp` endpoint speaking JSON-RPC
//! over plain JSON or Server-Sent Events, plus the health and OpenAPI
//! surface a deployed server needs around it.
//!
//! A synchronous call (`initialize`, `tools/list`, a batch, ...) gets a
//! plain `application/json` response. A non-batched `tools/call` gets an
//! SSE response instead, since the tool handler may turn around and ask
//! the client for sampling, elicitation, or roots before it can finish; any
//! such server-initiated calls are framed as `server_request`/
//! `server_notification` events ahead of the terminal result. A client that
//! wants to keep receiving server-initiated traffic outside the lifetime of
//! one request opens a long-lived `GET /mcp` stream instead.

mod routes;
mod rpc;
mod sse;
mod state;

pub mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::sse::Event;
use axum::Router;
use ferrite_mcp_core::SessionId;
use ferrite_mcp_server::{Dispatcher, HandlerRegistry, ServerConfig, SessionManager, TaskManager};
use serde_json::json;
use tracing::info;

use crate::state::AppState;

/// Owns the shared application state and builds/serves the axum router.
pub struct HttpTransport {
    state: AppState,
}

impl HttpTransport {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionManager>,
        tasks: Arc<TaskManager>,
        registry: Arc<HandlerRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            state: AppState::new(dispatcher, sessions, tasks, registry, config),
        }
    }

    /// The assembled router, for embedding in a larger axum app or serving
    /// directly via [`Self::serve`].
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Bind `addr` and serve until a shutdown signal arrives, draining
    /// in-flight work before returning.
    pub async fn serve(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "streamable HTTP transport listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown::wait_for_signal(self.state.clone()))
            .await
    }

    /// Push a `notifications/resources/updated` event to every session
    /// currently subscribed to `uri`, on whichever stream (an open `GET
    /// /mcp`, or an in-flight `tools/call` SSE response) that session has
    /// live right now. Sessions with neither simply miss the push; they'll
    /// see the resource's new state the next time they read it.
    pub fn notify_resource_updated(&self, uri: &str) {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "notifications/resources/updated",
            "params": {"uri": uri},
        });
        let subscribed = self.state.sessions().sessions_subscribed_to(uri);
        let live = self.state.live_streams().lock();
        for session_id in subscribed {
            if let Some(sender) = live.get(&session_id) {
                emit_raw(self.state.sessions(), &session_id, &payload, sender);
            }
        }
    }
}

fn emit_raw(
    sessions: &ferrite_mcp_server::SessionManager,
    session_id: &SessionId,
    payload: &serde_json::Value,
    sender: &tokio::sync::mpsc::UnboundedSender<Event>,
) {
    sse::emit(sessions, session_id, "server_notification", payload, sender);
}
