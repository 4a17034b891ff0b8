//! Per-request context propagation.
//!
//! The host SDK this framework's design is patterned after threads an
//! implicit context variable through the call stack; async Rust has no
//! stack-local storage that survives a `.await`, so we use
//! [`tokio::task_local!`] instead. A [`ContextScope`] installs a [`Context`]
//! for the duration of a future and every `.await` point inside that future
//! sees the same value, without leaking into sibling tasks spawned from it
//! (a child task must be handed the `Context` explicitly, the same way it
//! must be handed anything else it needs).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::McpResult;
use crate::ids::SessionId;

tokio::task_local! {
    static CURRENT: Context;
}

/// Everything a handler can read about the request it's currently serving,
/// plus a handle back to the client for server-initiated RPCs.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct Inner {
    request_id: String,
    session_id: Option<SessionId>,
    started_at: Instant,
    metadata: HashMap<String, Value>,
    cancellation: CancellationToken,
    rpc: Option<Arc<dyn ServerRpc>>,
    /// Resource links accumulated by handler code during the call, attached
    /// to the final result under `_meta.links` by the dispatcher.
    resource_links: Arc<Mutex<Vec<Value>>>,
}

impl Context {
    pub fn new(request_id: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            inner: Arc::new(Inner {
                request_id: request_id.into(),
                session_id,
                started_at: Instant::now(),
                metadata: HashMap::new(),
                cancellation: CancellationToken::new(),
                rpc: None,
                resource_links: Arc::new(Mutex::new(Vec::new())),
            }),
        }
    }

    /// Record a resource link produced while servicing this request.
    pub fn add_resource_link(&self, link: Value) {
        self.inner.resource_links.lock().push(link);
    }

    /// Drain every resource link accumulated so far, leaving the list empty.
    pub fn take_resource_links(&self) -> Vec<Value> {
        std::mem::take(&mut *self.inner.resource_links.lock())
    }

    /// Attach the channel used for sampling/elicitation/roots/progress
    /// calls back to the client that owns this request's session.
    pub fn with_rpc(self, rpc: Arc<dyn ServerRpc>) -> Self {
        let mut inner = (*self.inner).clone();
        inner.rpc = Some(rpc);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.inner.session_id.as_ref()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.inner.started_at.elapsed()
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.inner.metadata
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Read the [`Context`] installed by the innermost enclosing
    /// [`ContextScope`]. Panics if called outside one — every dispatch path
    /// that reaches handler code runs inside a scope, so this indicates a
    /// bug in the dispatcher, not a recoverable caller error.
    pub fn current() -> Self {
        CURRENT.with(|ctx| ctx.clone())
    }

    /// Like [`Context::current`], but returns `None` instead of panicking
    /// when no scope is active (used by code that may run outside a request,
    /// e.g. background sweeps).
    pub fn try_current() -> Option<Self> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    fn rpc(&self) -> McpResult<&Arc<dyn ServerRpc>> {
        self.inner
            .rpc
            .as_ref()
            .ok_or_else(|| crate::error::McpError::Internal("no client RPC channel bound to this context".into()))
    }

    /// Ask the client to run an LLM sampling request (`sampling/createMessage`).
    pub async fn sample(&self, request: Value) -> McpResult<Value> {
        self.rpc()?.create_message(request).await
    }

    /// Ask the client to elicit structured input from the user
    /// (`elicitation/create` with a form schema).
    pub async fn elicit_form(&self, message: impl Into<String>, schema: Value) -> McpResult<Value> {
        self.rpc()?.create_elicitation(message.into(), schema).await
    }

    /// Ask the client to direct the user to a URL and await their return
    /// (out-of-band elicitation, the success path that follows a handler
    /// returning `UrlElicitationRequired`).
    pub async fn elicit_url(&self, url: impl Into<String>, description: impl Into<String>) -> McpResult<Value> {
        self.rpc()?.elicit_url(url.into(), description.into()).await
    }

    /// Ask the client which filesystem roots it exposes.
    pub async fn list_roots(&self) -> McpResult<Value> {
        self.rpc()?.list_roots().await
    }

    /// Fire-and-forget progress notification for a long-running call.
    pub async fn report_progress(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        if let Ok(rpc) = self.rpc() {
            rpc.send_progress(progress, total, message).await;
        }
    }
}

/// Installs a [`Context`] as task-local state for the lifetime of a future.
pub struct ContextScope;

impl ContextScope {
    /// Run `fut` with `ctx` visible to [`Context::current`] everywhere inside
    /// it, including across `.await` suspension points.
    pub async fn run<F: Future>(ctx: Context, fut: F) -> F::Output {
        CURRENT.scope(ctx, fut).await
    }
}

/// The server-initiated operations a handler can invoke against the client
/// that owns its session: sampling, elicitation, roots, and progress.
/// Implemented by the transport layer, which knows how to correlate a
/// server-to-client call with the eventual client response.
#[async_trait]
pub trait ServerRpc: Send + Sync {
    async fn create_message(&self, request: Value) -> McpResult<Value>;
    async fn create_elicitation(&self, message: String, schema: Value) -> McpResult<Value>;
    async fn elicit_url(&self, url: String, description: String) -> McpResult<Value>;
    async fn list_roots(&self) -> McpResult<Value>;
    async fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<String>);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRpc;

    #[async_trait]
    impl ServerRpc for NoopRpc {
        async fn create_message(&self, _request: Value) -> McpResult<Value> {
            Ok(Value::Null)
        }
        async fn create_elicitation(&self, _message: String, _schema: Value) -> McpResult<Value> {
            Ok(Value::Null)
        }
        async fn elicit_url(&self, _url: String, _description: String) -> McpResult<Value> {
            Ok(Value::Null)
        }
        async fn list_roots(&self) -> McpResult<Value> {
            Ok(Value::Array(vec![]))
        }
        async fn send_progress(&self, _progress: f64, _total: Option<f64>, _message: Option<String>) {}
    }

    #[tokio::test]
    async fn context_survives_await_points() {
        let ctx = Context::new("req-1", Some(SessionId::from("sess-test")));
        ContextScope::run(ctx.clone(), async {
            tokio::task::yield_now().await;
            let current = Context::current();
            assert_eq!(current.request_id(), "req-1");
        })
        .await;
    }

    #[tokio::test]
    async fn try_current_is_none_outside_scope() {
        assert!(Context::try_current().is_none());
    }

    #[test]
    fn resource_links_accumulate_and_drain() {
        let ctx = Context::new("req-links", None);
        ctx.add_resource_link(serde_json::json!({"uri": "file:///a"}));
        let clone = ctx.clone();
        clone.add_resource_link(serde_json::json!({"uri": "file:///b"}));
        let links = ctx.take_resource_links();
        assert_eq!(links.len(), 2);
        assert!(ctx.take_resource_links().is_empty());
    }

    #[tokio::test]
    async fn sample_without_bound_rpc_errors() {
        let ctx = Context::new("req-2", None);
        ContextScope::run(ctx.clone(), async move {
            let err = Context::current().sample(Value::Null).await.unwrap_err();
            assert!(err.to_string().contains("no client RPC"));
        })
        .await;
    }

    #[tokio::test]
    async fn sample_with_bound_rpc_succeeds() {
        let ctx = Context::new("req-3", None).with_rpc(Arc::new(NoopRpc));
        ContextScope::run(ctx, async move {
            let result = Context::current().sample(Value::Null).await;
            assert!(result.is_ok());
        })
        .await;
    }
}
