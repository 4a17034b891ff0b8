//! The method dispatcher: the one [`ferrite_mcp_protocol::RequestDispatcher`]
//! implementation in this framework, wiring the handler registry, session
//! manager, task manager, rate limiter, and auth seam together against the
//! fixed inbound method table.

pub mod validation;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ferrite_mcp_core::{Context, McpError, McpResult, SessionId, TaskId};
use ferrite_mcp_protocol::methods::{completion, lifecycle, logging, notifications, prompts, resources, tasks, tools};
use ferrite_mcp_protocol::RequestDispatcher;
use ferrite_mcp_types::{ClientCapabilities, ServerCapabilities, ServerInfo};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn, Instrument};

use crate::auth::{check_scopes, TokenValidator};
use crate::config::ServerConfig;
use crate::logging::LoggingHandle;
use crate::rate_limit::RateBucket;
use crate::registry::HandlerRegistry;
use crate::routing::validation::validate_arguments;
use crate::session::SessionManager;
use crate::task::{TaskManager, TaskStatus};

const MAX_ARGUMENT_KEYS: usize = 100;
const COMPLETION_NOT_SUPPORTED: &str = "completion/complete has no registered provider for this reference";

fn require_object(params: Option<Value>) -> Value {
    params.unwrap_or(Value::Object(serde_json::Map::new()))
}

fn string_field<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

/// Turn a handler's raw return value into the `CallToolResult` wire shape.
/// A handler that already returns `{"content": [...]}` is passed through
/// unchanged (beyond attaching `structuredContent`/`_meta`); anything else
/// is wrapped as a single text block.
fn normalize_tool_result(raw: Value, output_schema: Option<&Value>, links: Vec<Value>) -> Value {
    let mut result = if raw.get("content").and_then(Value::as_array).is_some() {
        raw
    } else {
        let text = match &raw {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        let mut wrapped = json!({ "content": [{"type": "text", "text": text}] });
        if output_schema.is_some() {
            wrapped["structuredContent"] = raw;
        }
        wrapped
    };
    if !links.is_empty() {
        if let Some(obj) = result.as_object_mut() {
            let meta = obj.entry("_meta").or_insert_with(|| json!({}));
            meta["links"] = Value::Array(links);
        }
    }
    result
}

/// Implements every method in the fixed inbound table over the server-layer
/// components. Transport-agnostic: it never touches sockets, only
/// `Context`, JSON values, and the registry/session/task managers.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskManager>,
    config: Arc<ServerConfig>,
    token_validator: Option<Arc<dyn TokenValidator>>,
    logging: Option<Arc<LoggingHandle>>,
    active_requests: Mutex<HashMap<String, CancellationToken>>,
    draining: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        sessions: Arc<SessionManager>,
        tasks: Arc<TaskManager>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            registry,
            sessions,
            tasks,
            config,
            token_validator: None,
            logging: None,
            active_requests: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn with_token_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.token_validator = Some(validator);
        self
    }

    pub fn with_logging_handle(mut self, handle: Arc<LoggingHandle>) -> Self {
        self.logging = Some(handle);
        self
    }

    /// Stop accepting anything but the always-available methods (ping,
    /// task cancellation). Used by graceful shutdown.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    fn track_active(&self, request_id: &str, token: CancellationToken) {
        self.active_requests.lock().insert(request_id.to_string(), token);
    }

    fn untrack_active(&self, request_id: &str) {
        self.active_requests.lock().remove(request_id);
    }

    async fn handle_initialize(&self, _ctx: &Context, params: Value) -> McpResult<Value> {
        let requested = string_field(&params, "protocolVersion").unwrap_or(ferrite_mcp_core::DEFAULT_PROTOCOL_VERSION);
        let protocol_version = if ferrite_mcp_core::SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested.to_string()
        } else {
            ferrite_mcp_core::DEFAULT_PROTOCOL_VERSION.to_string()
        };
        let client_capabilities: ClientCapabilities = params
            .get("capabilities")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or(None)
            .unwrap_or_default();
        let session_id = self.sessions.create(protocol_version.clone(), client_capabilities);
        let identity = &self.config.identity;
        Ok(json!({
            "protocolVersion": protocol_version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo {
                name: identity.name.clone(),
                version: identity.version.clone(),
                title: identity.title.clone(),
                description: identity.description.clone(),
                icons: Vec::new(),
                website_url: identity.website_url.clone(),
            },
            "sessionId": session_id.as_str(),
        }))
    }

    fn require_session(&self, ctx: &Context) -> McpResult<SessionId> {
        ctx.session_id()
            .cloned()
            .ok_or_else(|| McpError::InvalidRequest("no session bound to this request".into()))
    }

    async fn handle_tools_list(&self, params: Value) -> McpResult<Value> {
        let cursor = string_field(&params, "cursor").map(str::to_string);
        let limit = params.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let (fragments, next_cursor) = self.registry.list_tools(cursor.as_deref(), limit);
        let tools: Vec<Value> = fragments
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap_or(Value::Null))
            .collect();
        let mut result = json!({ "tools": tools });
        if let Some(cursor) = next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn handle_tools_call(&self, ctx: Context, params: Value) -> McpResult<Value> {
        let name = string_field(&params, "name")
            .ok_or_else(|| McpError::InvalidRequest("tools/call requires a `name`".into()))?
            .to_string();
        let mut arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let Some((requires_auth, scopes)) = self.registry.tool_requires_auth(&name) else {
            let suggestion = self.registry.suggest_tool_name(&name);
            let message = match suggestion {
                Some(close) => format!("no such tool: {name} (did you mean `{close}`?)"),
                None => format!("no such tool: {name}"),
            };
            return Err(McpError::ToolNotFound(message));
        };

        if let Some(obj) = arguments.as_object() {
            if obj.len() > MAX_ARGUMENT_KEYS {
                return Err(McpError::InvalidRequest(format!(
                    "arguments object exceeds the {MAX_ARGUMENT_KEYS}-key limit"
                )));
            }
        }

        let session_id = self.require_session(&ctx)?;

        if let Some(rate) = self.registry.tool_rate_limit(&name) {
            let allowed = self
                .sessions
                .with_session(&session_id, |session| {
                    let bucket = session.rate_bucket.get_or_insert_with(|| RateBucket::new(rate));
                    bucket.try_consume()
                })
                .unwrap_or(false);
            if !allowed {
                let retry_after_ms = self
                    .sessions
                    .with_session(&session_id, |session| {
                        session.rate_bucket.as_ref().map(RateBucket::retry_after_ms)
                    })
                    .flatten()
                    .unwrap_or(1000);
                return Err(McpError::RateLimited { retry_after_ms });
            }
        }

        if requires_auth {
            let Some(validator) = &self.token_validator else {
                return Err(McpError::CapabilityUnavailable(
                    "server has no token validator configured for authenticated tools".into(),
                ));
            };
            let token = arguments
                .get("_external_access_token")
                .and_then(Value::as_str)
                .ok_or(McpError::Unauthorized)?;
            let identity = validator.validate(token).await.map_err(|_| McpError::Unauthorized)?;
            check_scopes(&identity, &scopes).map_err(|e| McpError::ForbiddenScope(e.to_string()))?;
            if let Some(obj) = arguments.as_object_mut() {
                obj.insert("_user_id".into(), json!(identity.user_id));
            }
        }

        let input_schema = self.registry.tool_input_schema(&name);
        if let Some(schema) = &input_schema {
            validate_arguments(schema, &arguments).map_err(|failure| McpError::ParameterValidation {
                param_name: failure.param_name,
                expected_type: failure.expected_type,
                observed: failure.observed,
            })?;
        }

        let output_schema = self.registry.tool_output_schema(&name);
        let task_id = self.tasks.create(session_id.clone(), name.clone());
        let cancellation = self.tasks.cancellation_token(&task_id);

        let Some(handler_future) = self.registry.call_tool(ctx.clone(), &name, arguments) else {
            // Registered a moment ago, unregistered since — race between
            // list and call. Treat exactly like an unknown tool.
            return Err(McpError::ToolNotFound(name));
        };

        if self.registry.tool_is_long_running(&name) {
            let tasks = self.tasks.clone();
            let task_id_bg = task_id.clone();
            tokio::spawn(async move {
                let result = handler_future.await;
                let cancelled = cancellation.as_ref().is_some_and(CancellationToken::is_cancelled);
                if cancelled {
                    let _ = tasks.set_cancelled(&task_id_bg);
                    return;
                }
                match result {
                    Ok(value) => {
                        let _ = tasks.set_result(&task_id_bg, value);
                    }
                    Err(err) => {
                        let _ = tasks.set_error(&task_id_bg, err.to_string());
                    }
                }
            });
            return Ok(json!({ "taskId": task_id.as_str(), "status": "working" }));
        }

        let result = handler_future.await;
        let cancelled = cancellation.as_ref().is_some_and(CancellationToken::is_cancelled);
        if cancelled {
            let _ = self.tasks.set_cancelled(&task_id);
            return Err(McpError::Internal(format!("task {task_id} was cancelled")));
        }
        match result {
            Ok(value) => {
                let _ = self.tasks.set_result(&task_id, value.clone());
                let links = ctx.take_resource_links();
                Ok(normalize_tool_result(value, output_schema.as_ref(), links))
            }
            Err(err) => {
                let _ = self.tasks.set_error(&task_id, err.to_string());
                Err(err)
            }
        }
    }

    async fn handle_resources_list(&self, params: Value) -> McpResult<Value> {
        let cursor = string_field(&params, "cursor").map(str::to_string);
        let limit = params.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let (fragments, next_cursor) = self.registry.list_resources(cursor.as_deref(), limit);
        let resources: Vec<Value> = fragments
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap_or(Value::Null))
            .collect();
        let mut result = json!({ "resources": resources });
        if let Some(cursor) = next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn handle_resource_templates_list(&self, params: Value) -> McpResult<Value> {
        let cursor = string_field(&params, "cursor").map(str::to_string);
        let limit = params.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let (fragments, next_cursor) = self.registry.list_resource_templates(cursor.as_deref(), limit);
        let templates: Vec<Value> = fragments
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap_or(Value::Null))
            .collect();
        let mut result = json!({ "resourceTemplates": templates });
        if let Some(cursor) = next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn handle_resources_read(&self, ctx: Context, params: Value) -> McpResult<Value> {
        let uri = string_field(&params, "uri")
            .ok_or_else(|| McpError::InvalidRequest("resources/read requires a `uri`".into()))?
            .to_string();
        let Some(future) = self.registry.read_resource(ctx, &uri) else {
            return Err(McpError::ResourceNotFound(uri));
        };
        let contents = future.await?;
        Ok(json!({ "contents": [contents] }))
    }

    fn handle_resources_subscribe(&self, ctx: &Context, params: Value, subscribe: bool) -> McpResult<Value> {
        let uri = string_field(&params, "uri")
            .ok_or_else(|| McpError::InvalidRequest("requires a `uri`".into()))?
            .to_string();
        let session_id = self.require_session(ctx)?;
        self.sessions.with_session(&session_id, |session| {
            if subscribe {
                session.subscriptions.insert(uri);
            } else {
                session.subscriptions.remove(&uri);
            }
        });
        Ok(json!({}))
    }

    async fn handle_prompts_list(&self, params: Value) -> McpResult<Value> {
        let cursor = string_field(&params, "cursor").map(str::to_string);
        let limit = params.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let (fragments, next_cursor) = self.registry.list_prompts(cursor.as_deref(), limit);
        let prompts: Vec<Value> = fragments
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap_or(Value::Null))
            .collect();
        let mut result = json!({ "prompts": prompts });
        if let Some(cursor) = next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn handle_prompts_get(&self, ctx: Context, params: Value) -> McpResult<Value> {
        let name = string_field(&params, "name")
            .ok_or_else(|| McpError::InvalidRequest("prompts/get requires a `name`".into()))?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let Some(future) = self.registry.get_prompt(ctx, &name, arguments) else {
            return Err(McpError::PromptNotFound(name));
        };
        future.await
    }

    fn parse_task_id(params: &Value) -> McpResult<TaskId> {
        string_field(params, "taskId")
            .map(TaskId::from)
            .ok_or_else(|| McpError::InvalidRequest("requires a `taskId`".into()))
    }

    fn handle_tasks_get(&self, params: Value) -> McpResult<Value> {
        let id = Self::parse_task_id(&params)?;
        let status = self
            .tasks
            .get_status(&id)
            .map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        Ok(json!({ "taskId": id.as_str(), "status": status }))
    }

    fn handle_tasks_result(&self, params: Value) -> McpResult<Value> {
        let id = Self::parse_task_id(&params)?;
        let (result, error) = self
            .tasks
            .get_result(&id)
            .map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        match error {
            Some(message) => Err(McpError::Internal(message)),
            None => Ok(result.unwrap_or(Value::Null)),
        }
    }

    fn handle_tasks_list(&self, ctx: &Context) -> McpResult<Value> {
        let session_id = self.require_session(ctx)?;
        let ids: Vec<Value> = self
            .tasks
            .list_for_session(&session_id)
            .into_iter()
            .map(|id| json!(id.as_str()))
            .collect();
        Ok(json!({ "tasks": ids }))
    }

    fn handle_tasks_cancel(&self, params: Value) -> McpResult<Value> {
        let id = Self::parse_task_id(&params)?;
        self.tasks.cancel(&id).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        Ok(json!({}))
    }

    async fn handle_completion_complete(&self, ctx: Context, params: Value) -> McpResult<Value> {
        let reference = params
            .get("ref")
            .cloned()
            .ok_or_else(|| McpError::InvalidRequest("completion/complete requires a `ref`".into()))?;
        let ref_type = reference
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::InvalidRequest("`ref.type` must be `ref/resource` or `ref/prompt`".into()))?
            .to_string();
        let argument = params.get("argument").cloned().unwrap_or_else(|| json!({}));

        let Some(future) = self.registry.complete(ctx, &ref_type, reference, argument) else {
            return Ok(json!({
                "completion": { "values": [], "hasMore": false },
                "_meta": { "note": COMPLETION_NOT_SUPPORTED },
            }));
        };
        let values = future.await?;
        let has_more = values.len() > 100;
        let values: Vec<Value> = values.into_iter().take(100).map(Value::String).collect();
        Ok(json!({ "completion": { "values": values, "hasMore": has_more } }))
    }

    fn handle_logging_set_level(&self, params: Value) -> McpResult<Value> {
        let level = string_field(&params, "level")
            .ok_or_else(|| McpError::InvalidRequest("logging/setLevel requires a `level`".into()))?;
        let Some(handle) = &self.logging else {
            return Err(McpError::CapabilityUnavailable("server has no reloadable logger configured".into()));
        };
        handle
            .set_mcp_level(level)
            .map_err(|e| McpError::InvalidRequest(e.to_string()))?;
        Ok(json!({}))
    }
}

#[async_trait]
impl RequestDispatcher for Dispatcher {
    #[instrument(name = "mcp.request", skip(self, ctx, params), fields(method = %method))]
    async fn dispatch(&self, ctx: Context, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.draining.load(Ordering::SeqCst)
            && !ferrite_mcp_protocol::methods::is_always_available(method)
        {
            return Err(McpError::Shutdown);
        }

        if self.config.strict_session_gating
            && method != lifecycle::INITIALIZE
            && method != lifecycle::PING
            && method != notifications::INITIALIZED
        {
            let gated = match ctx.session_id() {
                Some(session_id) => !self.sessions.is_initialized(session_id),
                None => true,
            };
            if gated {
                return Err(McpError::InvalidRequest(format!(
                    "session must send notifications/initialized before calling {method}"
                )));
            }
        }

        let params = require_object(params);
        self.track_active(ctx.request_id(), ctx.cancellation_token().clone());
        let result = self.dispatch_inner(ctx.clone(), method, params).await;
        self.untrack_active(ctx.request_id());
        result
    }

    async fn cancel(&self, _ctx: Context, request_id: &str, reason: Option<String>) {
        if let Some(token) = self.active_requests.lock().get(request_id) {
            token.cancel();
        } else {
            warn!(%request_id, ?reason, "cancellation for unknown or already-finished request");
        }
    }
}

impl Dispatcher {
    async fn dispatch_inner(&self, ctx: Context, method: &str, params: Value) -> Result<Value, McpError> {
        match method {
            lifecycle::INITIALIZE => self.handle_initialize(&ctx, params).await,
            lifecycle::PING => Ok(json!({})),

            notifications::INITIALIZED => {
                if let Some(session_id) = ctx.session_id() {
                    self.sessions.mark_initialized(session_id);
                }
                Ok(Value::Null)
            }
            notifications::PROGRESS => Ok(Value::Null),
            notifications::ROOTS_LIST_CHANGED => Ok(Value::Null),

            tools::LIST => self.handle_tools_list(params).await,
            tools::CALL => {
                let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let span = tracing::info_span!("mcp.tool", tool = %tool_name);
                self.handle_tools_call(ctx, params).instrument(span).await
            }

            resources::LIST => self.handle_resources_list(params).await,
            resources::TEMPLATES_LIST => self.handle_resource_templates_list(params).await,
            resources::READ => self.handle_resources_read(ctx, params).await,
            resources::SUBSCRIBE => self.handle_resources_subscribe(&ctx, params, true),
            resources::UNSUBSCRIBE => self.handle_resources_subscribe(&ctx, params, false),

            prompts::LIST => self.handle_prompts_list(params).await,
            prompts::GET => self.handle_prompts_get(ctx, params).await,

            tasks::GET => self.handle_tasks_get(params),
            tasks::RESULT => self.handle_tasks_result(params),
            tasks::LIST => self.handle_tasks_list(&ctx),
            tasks::CANCEL => self.handle_tasks_cancel(params),

            completion::COMPLETE => self.handle_completion_complete(ctx, params).await,

            logging::SET_LEVEL => self.handle_logging_set_level(params),

            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::{ResourceOptions, ToolOptions};
    use ferrite_mcp_types::FieldSpec;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(HandlerRegistry::new());
        let sessions = Arc::new(SessionManager::new(100, Duration::from_secs(3600)));
        let tasks = Arc::new(TaskManager::new());
        let config = Arc::new(ServerConfig::default());
        Dispatcher::new(registry, sessions, tasks, config)
    }

    fn initialized_context(dispatcher: &Dispatcher) -> Context {
        let session_id = dispatcher
            .sessions
            .create("2025-11-25".into(), ClientCapabilities::default());
        dispatcher.sessions.mark_initialized(&session_id);
        Context::new("req-1", Some(session_id))
    }

    #[tokio::test]
    async fn initialize_negotiates_a_supported_version() {
        let dispatcher = dispatcher();
        let ctx = Context::new("req-0", None);
        let result = dispatcher
            .dispatch(ctx, lifecycle::INITIALIZE, Some(json!({"protocolVersion": "bogus"})))
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], json!(ferrite_mcp_core::DEFAULT_PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn uninitialized_session_is_rejected_except_for_ping() {
        let dispatcher = dispatcher();
        let session_id = dispatcher
            .sessions
            .create("2025-11-25".into(), ClientCapabilities::default());
        let ctx = Context::new("req-pre-init", Some(session_id));
        let err = dispatcher.dispatch(ctx.clone(), tools::LIST, None).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidRequest(_)));
        assert!(dispatcher.dispatch(ctx, lifecycle::PING, None).await.is_ok());
    }

    #[tokio::test]
    async fn ping_succeeds_while_draining() {
        let dispatcher = dispatcher();
        dispatcher.begin_drain();
        let ctx = initialized_context(&dispatcher);
        let result = dispatcher.dispatch(ctx, lifecycle::PING, None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn draining_rejects_ordinary_methods() {
        let dispatcher = dispatcher();
        dispatcher.begin_drain();
        let ctx = initialized_context(&dispatcher);
        let err = dispatcher.dispatch(ctx, tools::LIST, None).await.unwrap_err();
        assert!(matches!(err, McpError::Shutdown));
    }

    #[tokio::test]
    async fn calling_unknown_tool_suggests_close_match() {
        let dispatcher = dispatcher();
        dispatcher
            .registry
            .register_tool(
                "add_numbers",
                &[],
                Arc::new(|_ctx, args| Box::pin(async move { Ok(args) })),
                ToolOptions::default(),
            )
            .unwrap();
        let ctx = initialized_context(&dispatcher);
        let err = dispatcher
            .dispatch(ctx, tools::CALL, Some(json!({"name": "add_numers"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("add_numbers"));
    }

    #[tokio::test]
    async fn normal_tool_call_returns_content_directly() {
        let dispatcher = dispatcher();
        dispatcher
            .registry
            .register_tool(
                "echo",
                &[FieldSpec::new("text", ferrite_mcp_types::FieldType::String)],
                Arc::new(|_ctx, args| Box::pin(async move { Ok(args["text"].clone()) })),
                ToolOptions::default(),
            )
            .unwrap();
        let ctx = initialized_context(&dispatcher);
        let result = dispatcher
            .dispatch(ctx, tools::CALL, Some(json!({"name": "echo", "arguments": {"text": "hi"}})))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["type"], json!("text"));
        assert_eq!(result["content"][0]["text"], json!("hi"));
    }

    #[tokio::test]
    async fn long_running_tool_returns_task_reference() {
        let dispatcher = dispatcher();
        dispatcher
            .registry
            .register_tool(
                "slow",
                &[],
                Arc::new(|_ctx, _args| Box::pin(async move { Ok(json!("done")) })),
                ToolOptions {
                    long_running: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let ctx = initialized_context(&dispatcher);
        let result = dispatcher
            .dispatch(ctx, tools::CALL, Some(json!({"name": "slow"})))
            .await
            .unwrap();
        assert_eq!(result["status"], json!("working"));
        assert!(result["taskId"].is_string());
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_dispatch() {
        let dispatcher = dispatcher();
        dispatcher
            .registry
            .register_tool(
                "add",
                &[FieldSpec::new("a", ferrite_mcp_types::FieldType::Integer)],
                Arc::new(|_ctx, args| Box::pin(async move { Ok(args) })),
                ToolOptions::default(),
            )
            .unwrap();
        let ctx = initialized_context(&dispatcher);
        let err = dispatcher
            .dispatch(ctx, tools::CALL, Some(json!({"name": "add", "arguments": {}})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ParameterValidation { .. }));
    }

    #[tokio::test]
    async fn resource_read_of_unknown_uri_errors() {
        let dispatcher = dispatcher();
        let ctx = initialized_context(&dispatcher);
        let err = dispatcher
            .dispatch(ctx, resources::READ, Some(json!({"uri": "file:///missing"})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn resource_subscribe_records_uri_on_the_session() {
        let dispatcher = dispatcher();
        dispatcher
            .registry
            .register_resource(
                "file:///a",
                Arc::new(|_ctx| Box::pin(async move { Ok(json!({"uri": "file:///a", "text": "hi"})) })),
                ResourceOptions::default(),
            )
            .unwrap();
        let ctx = initialized_context(&dispatcher);
        let session_id = ctx.session_id().unwrap().clone();
        dispatcher
            .dispatch(ctx, resources::SUBSCRIBE, Some(json!({"uri": "file:///a"})))
            .await
            .unwrap();
        let subscribed = dispatcher
            .sessions
            .with_session(&session_id, |s| s.subscriptions.contains("file:///a"))
            .unwrap();
        assert!(subscribed);
    }

    #[tokio::test]
    async fn tasks_get_reports_working_then_completed() {
        let dispatcher = dispatcher();
        dispatcher
            .registry
            .register_tool(
                "slow",
                &[],
                Arc::new(|_ctx, _args| Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(json!("done"))
                })),
                ToolOptions {
                    long_running: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let ctx = initialized_context(&dispatcher);
        let result = dispatcher
            .dispatch(ctx.clone(), tools::CALL, Some(json!({"name": "slow"})))
            .await
            .unwrap();
        let task_id = result["taskId"].as_str().unwrap().to_string();
        let status = dispatcher
            .dispatch(ctx.clone(), tasks::GET, Some(json!({"taskId": task_id})))
            .await
            .unwrap();
        assert_eq!(status["status"], json!("working"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let status = dispatcher
            .dispatch(ctx, tasks::GET, Some(json!({"taskId": task_id})))
            .await
            .unwrap();
        assert_eq!(status["status"], json!("completed"));
    }

    #[tokio::test]
    async fn completion_without_provider_reports_empty() {
        let dispatcher = dispatcher();
        let ctx = initialized_context(&dispatcher);
        let result = dispatcher
            .dispatch(
                ctx,
                "completion/complete",
                Some(json!({"ref": {"type": "ref/prompt", "name": "greeting"}, "argument": {"name": "lang", "value": "en"}})),
            )
            .await
            .unwrap();
        assert_eq!(result["completion"]["values"], json!([]));
        assert_eq!(result["completion"]["hasMore"], json!(false));
    }

    #[tokio::test]
    async fn completion_with_registered_provider_returns_candidates() {
        let dispatcher = dispatcher();
        dispatcher.registry.register_completion_provider(
            "ref/prompt",
            Arc::new(|_ctx, _reference, _argument| {
                Box::pin(async move { Ok(vec!["english".into(), "esperanto".into()]) })
            }),
        );
        let ctx = initialized_context(&dispatcher);
        let result = dispatcher
            .dispatch(
                ctx,
                "completion/complete",
                Some(json!({"ref": {"type": "ref/prompt", "name": "greeting"}, "argument": {"name": "lang", "value": "es"}})),
            )
            .await
            .unwrap();
        assert_eq!(result["completion"]["values"], json!(["english", "esperanto"]));
        assert_eq!(result["completion"]["hasMore"], json!(false));
    }

    #[tokio::test]
    async fn cancel_notification_fires_the_tracked_token() {
        let dispatcher = dispatcher();
        let ctx = Context::new("req-cancel", None);
        RequestDispatcher::dispatch(&dispatcher, ctx.clone(), lifecycle::PING, None)
            .await
            .unwrap();
        // The token is untracked once dispatch returns; re-track manually to
        // exercise `cancel` against a still-registered id.
        dispatcher.track_active("req-cancel", ctx.cancellation_token().clone());
        dispatcher.cancel(ctx.clone(), "req-cancel", None).await;
        assert!(ctx.is_cancelled());
    }
}
