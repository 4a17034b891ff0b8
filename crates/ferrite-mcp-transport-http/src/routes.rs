//! Route handlers and router assembly for the streamable HTTP transport.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskCx, Poll};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use ferrite_mcp_core::{Context, SessionId};
use ferrite_mcp_protocol::engine::ParsedInbound;
use ferrite_mcp_protocol::methods::{lifecycle, tools};
use ferrite_mcp_types::{JsonRpcMessage, JsonRpcResponse, JsonRpcResponsePayload};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::rpc::{respond_error_value, HttpServerRpc};
use crate::sse::replay_events;
use crate::state::AppState;

const MCP_SESSION_ID: &str = "mcp-session-id";
const MCP_PROTOCOL_VERSION: &str = "mcp-protocol-version";
const LAST_EVENT_ID: &str = "last-event-id";

/// Build the axum router for the whole streamable HTTP surface: `/mcp`,
/// `/mcp/respond`, the three health endpoints, and `/openapi.json`. CORS
/// allows every origin — MCP clients run from browser-embedded agents whose
/// origin the server has no way to pre-enumerate.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)])
        .max_age(Duration::from_secs(86400));

    let max_message_bytes = state.config().max_message_bytes;

    Router::new()
        .route("/mcp", post(post_mcp).get(get_mcp).delete(delete_mcp))
        .route("/mcp/respond", post(post_respond))
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/detailed", get(health_detailed))
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(max_message_bytes))
        .layer(cors)
        .with_state(state)
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(SessionId::from)
}

fn requires_session_header(method: &str) -> bool {
    method != lifecycle::INITIALIZE && method != lifecycle::PING
}

static NOTIFICATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A stable string to key cancellation/tracing on. Requests already have a
/// wire id; notifications don't, so one is minted here — it never leaves
/// the process.
fn request_id_string(message: &JsonRpcMessage) -> String {
    match &message.id {
        Some(id) => id.to_string(),
        None => format!("notify-{}", NOTIFICATION_COUNTER.fetch_add(1, Ordering::Relaxed)),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

/// Headers every `/mcp` response carries: the session id (echoed from the
/// request, or newly minted by a successful `initialize`) and the
/// negotiated protocol version.
fn correlation_headers(state: &AppState, session_id: Option<&SessionId>, response: Option<&JsonRpcResponse>) -> HeaderMap {
    let mut resolved_session = session_id.map(|s| s.as_str().to_string());
    let mut protocol_version = None;

    if let Some(JsonRpcResponse {
        payload: JsonRpcResponsePayload::Success { result },
        ..
    }) = response
    {
        if let Some(sid) = result.get("sessionId").and_then(Value::as_str) {
            resolved_session = Some(sid.to_string());
        }
        if let Some(pv) = result.get("protocolVersion").and_then(Value::as_str) {
            protocol_version = Some(pv.to_string());
        }
    }

    if protocol_version.is_none() {
        if let Some(sid) = session_id {
            protocol_version = state.sessions().with_session(sid, |s| s.protocol_version.clone());
        }
    }
    let protocol_version = protocol_version.unwrap_or_else(|| ferrite_mcp_core::DEFAULT_PROTOCOL_VERSION.to_string());

    let mut headers = HeaderMap::new();
    if let Some(sid) = resolved_session {
        if let Ok(value) = HeaderValue::from_str(&sid) {
            headers.insert(HeaderName::from_static(MCP_SESSION_ID), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&protocol_version) {
        headers.insert(HeaderName::from_static(MCP_PROTOCOL_VERSION), value);
    }
    headers
}

async fn post_mcp(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type_ok = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !content_type_ok {
        return bad_request("Content-Type must be application/json");
    }

    let parsed = match state.engine().parse(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            let response = JsonRpcResponse::error(ferrite_mcp_types::ResponseId::null(), err.to_jsonrpc_error());
            return (StatusCode::OK, Json(response)).into_response();
        }
    };

    let session_id = session_id_from_headers(&headers);

    let methods: Vec<&str> = match &parsed {
        ParsedInbound::Single(m) => vec![m.method.as_str()],
        ParsedInbound::Batch(ms) => ms.iter().map(|m| m.method.as_str()).collect(),
    };
    if session_id.is_none() && methods.iter().any(|m| requires_session_header(m)) {
        return bad_request("Mcp-Session-Id header is required for this method");
    }

    match parsed {
        ParsedInbound::Single(message) if message.method == tools::CALL && message.id.is_some() => {
            handle_tool_call_sse(state, session_id.expect("tools/call requires a session"), message).await
        }
        ParsedInbound::Single(message) => {
            let request_id = request_id_string(&message);
            let ctx = Context::new(request_id, session_id.clone());
            let response = state.engine().handle_one(ctx, message).await;
            let headers = correlation_headers(&state, session_id.as_ref(), response.as_ref());
            match response {
                Some(response) => (headers, Json(response)).into_response(),
                None => (headers, StatusCode::NO_CONTENT).into_response(),
            }
        }
        ParsedInbound::Batch(messages) => {
            let contexts: Vec<Context> = messages
                .iter()
                .map(|m| Context::new(request_id_string(m), session_id.clone()))
                .collect();
            let headers = correlation_headers(&state, session_id.as_ref(), None);
            let responses = state.engine().handle_batch(contexts, messages).await;
            (headers, Json(responses)).into_response()
        }
    }
}

/// `tools/call` is the one method whose handler may turn around and make a
/// sampling/elicitation/roots request of the client mid-flight, so it alone
/// gets an SSE response: zero or more `server_request`/`server_notification`
/// frames, followed by the terminal `event: message` carrying the call's
/// own JSON-RPC response.
async fn handle_tool_call_sse(state: AppState, session_id: SessionId, message: JsonRpcMessage) -> Response {
    if !state.sessions().exists(&session_id) {
        return bad_request("unknown session");
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let pending = state
        .sessions()
        .with_session(&session_id, |s| s.pending_requests.clone())
        .expect("session existence checked above");

    let rpc = Arc::new(HttpServerRpc {
        session_id: session_id.clone(),
        sessions: state.sessions_arc(),
        pending,
        sender: tx.clone(),
    });
    let ctx = Context::new(request_id_string(&message), Some(session_id.clone())).with_rpc(rpc);

    let headers = correlation_headers(&state, Some(&session_id), None);

    let dispatcher_state = state;
    let emit_session_id = session_id;

    tokio::spawn(async move {
        let outcome = dispatcher_state.engine().handle_one(ctx, message).await;
        if let Some(response) = outcome {
            let payload = serde_json::to_value(&response).unwrap_or(Value::Null);
            crate::sse::emit(dispatcher_state.sessions(), &emit_session_id, "message", &payload, &tx);
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    (headers, Sse::new(stream).keep_alive(KeepAlive::default())).into_response()
}

async fn get_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from_headers(&headers) else {
        return bad_request("Mcp-Session-Id header is required");
    };
    if !state.sessions().exists(&session_id) {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    {
        let mut live = state.live_streams().lock();
        if live.contains_key(&session_id) {
            return (
                StatusCode::CONFLICT,
                "a server-push stream is already open for this session",
            )
                .into_response();
        }
        live.insert(session_id.clone(), tx);
    }
    state.sessions().set_protected(&session_id, true);

    let last_event_id = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let replayed = replay_events(state.sessions(), &session_id, last_event_id);

    let guard = StreamGuard {
        state: state.clone(),
        session_id: session_id.clone(),
    };
    let combined = GuardedStream {
        inner: stream::iter(replayed).chain(UnboundedReceiverStream::new(rx)),
        _guard: guard,
    }
    .map(Ok::<Event, Infallible>);

    let headers = correlation_headers(&state, Some(&session_id), None);
    (headers, Sse::new(combined).keep_alive(KeepAlive::default())).into_response()
}

/// Drops the live-stream registration and un-protects the session when a
/// GET `/mcp` stream ends, however it ends — client disconnect, server
/// shutdown, or the underlying channel closing.
struct StreamGuard {
    state: AppState,
    session_id: SessionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.live_streams().lock().remove(&self.session_id);
        self.state.sessions().set_protected(&self.session_id, false);
    }
}

struct GuardedStream<S> {
    inner: S,
    _guard: StreamGuard,
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from_headers(&headers) else {
        return bad_request("Mcp-Session-Id header is required");
    };
    state.tasks().purge_session(&session_id);
    state.live_streams().lock().remove(&session_id);
    state.sessions().remove(&session_id);
    StatusCode::NO_CONTENT.into_response()
}

async fn post_respond(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let Some(session_id) = session_id_from_headers(&headers) else {
        return bad_request("Mcp-Session-Id header is required");
    };
    let Some(id) = body.get("id").and_then(Value::as_str) else {
        return bad_request("response body requires a string `id`");
    };

    let Some(pending) = state.sessions().with_session(&session_id, |s| s.pending_requests.clone()) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let value = match body.get("error") {
        Some(error) => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("client reported an error")
                .to_string();
            respond_error_value(message)
        }
        None => body.get("result").cloned().unwrap_or(Value::Null),
    };

    match pending.resolve(id, value) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "no pending server-initiated request with that id").into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptimeSeconds": state.started_at().elapsed().as_secs(),
    }))
}

async fn health_ready(State(state): State<AppState>) -> Response {
    if state.registry().tool_count() >= 1 {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not_ready" }))).into_response()
    }
}

async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptimeSeconds": state.started_at().elapsed().as_secs(),
        "sessions": state.sessions().count(),
        "tools": state.registry().tool_count(),
        "resources": state.registry().resource_count(),
        "prompts": state.registry().prompt_count(),
        "tasksInFlight": state.tasks().in_flight_count(),
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<Value> {
    Json(ferrite_mcp_server::openapi::synthesize(state.registry(), &state.config().identity))
}
