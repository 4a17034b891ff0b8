//! Turns raw request bytes into dispatcher calls and dispatcher results
//! back into JSON-RPC response frames, including batch fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use ferrite_mcp_core::{Context, McpError};
use ferrite_mcp_types::{JsonRpcMessage, JsonRpcResponse};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::{Error, ProtocolResult};
use crate::methods;

/// Whatever owns the handler registry and session state implements this so
/// the engine can hand off application-level work without knowing what a
/// tool or a resource is.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn dispatch(&self, ctx: Context, method: &str, params: Option<Value>) -> Result<Value, McpError>;

    /// `notifications/cancelled` arrived for `request_id`; flip its
    /// cancellation token. Never returns an error — a cancellation for a
    /// request that already finished is simply a no-op.
    async fn cancel(&self, ctx: Context, request_id: &str, reason: Option<String>);
}

/// Lets transports share one dispatcher across request-handling tasks
/// without each holding a private copy of the routing state.
#[async_trait]
impl<T: RequestDispatcher + ?Sized> RequestDispatcher for Arc<T> {
    async fn dispatch(&self, ctx: Context, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        (**self).dispatch(ctx, method, params).await
    }

    async fn cancel(&self, ctx: Context, request_id: &str, reason: Option<String>) {
        (**self).cancel(ctx, request_id, reason).await;
    }
}

/// One raw inbound payload, already split into individual JSON-RPC
/// messages (a lone message or the members of a batch array).
pub enum ParsedInbound {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

pub struct Engine<D> {
    dispatcher: D,
    max_message_bytes: usize,
}

impl<D: RequestDispatcher> Engine<D> {
    pub fn new(dispatcher: D, max_message_bytes: usize) -> Self {
        Self {
            dispatcher,
            max_message_bytes,
        }
    }

    /// Parse a raw frame into one or more [`JsonRpcMessage`]s, rejecting
    /// frames over the configured byte limit and empty batch arrays.
    pub fn parse(&self, raw: &[u8]) -> ProtocolResult<ParsedInbound> {
        if raw.len() > self.max_message_bytes {
            return Err(Error::MessageTooLarge {
                limit: self.max_message_bytes,
            });
        }
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| Error::Core(McpError::ParseError(e.to_string())))?;
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(Error::EmptyBatch);
                }
                let messages = items
                    .into_iter()
                    .map(|item| {
                        serde_json::from_value(item)
                            .map_err(|e| Error::Core(McpError::ParseError(e.to_string())))
                    })
                    .collect::<ProtocolResult<Vec<JsonRpcMessage>>>()?;
                Ok(ParsedInbound::Batch(messages))
            }
            single => {
                let message: JsonRpcMessage =
                    serde_json::from_value(single).map_err(|e| Error::Core(McpError::ParseError(e.to_string())))?;
                Ok(ParsedInbound::Single(message))
            }
        }
    }

    /// Handle one message. Returns `None` for notifications, which never
    /// produce a response frame.
    #[instrument(skip(self, ctx, message), fields(method = %message.method))]
    pub async fn handle_one(&self, ctx: Context, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        let JsonRpcMessage {
            method, params, id, ..
        } = message;

        if methods::is_engine_internal_notification(&method) {
            if method == methods::notifications::CANCELLED {
                self.handle_cancellation(ctx, params).await;
            }
            return None;
        }

        let Some(request_id) = id else {
            // A genuine notification destined for the dispatcher (none are
            // currently defined beyond the engine-internal ones above, but
            // unknown notifications are dropped rather than answered).
            if let Err(err) = self.dispatcher.dispatch(ctx, &method, params).await {
                warn!(%method, error = %err, "notification handler failed");
            }
            return None;
        };

        match self.dispatcher.dispatch(ctx, &method, params).await {
            Ok(result) => Some(JsonRpcResponse::success(request_id, result)),
            Err(err) => {
                let protocol_err = Error::Core(err);
                let response_id = ferrite_mcp_types::ResponseId::from_request(request_id);
                Some(JsonRpcResponse::error(response_id, protocol_err.to_jsonrpc_error()))
            }
        }
    }

    async fn handle_cancellation(&self, ctx: Context, params: Option<Value>) {
        let Some(params) = params else {
            warn!("notifications/cancelled received with no params");
            return;
        };
        let request_id = params
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let reason = params
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        match request_id {
            Some(id) => self.dispatcher.cancel(ctx, &id, reason).await,
            None => warn!("notifications/cancelled missing requestId"),
        }
    }

    /// Handle every message in a batch concurrently. The relative order of
    /// responses in the returned vector matches the order of non-notification
    /// messages in the input, not necessarily completion order.
    pub async fn handle_batch(&self, contexts: Vec<Context>, messages: Vec<JsonRpcMessage>) -> Vec<JsonRpcResponse> {
        debug_assert_eq!(contexts.len(), messages.len());
        let futures = contexts
            .into_iter()
            .zip(messages)
            .map(|(ctx, message)| self.handle_one(ctx, message));
        futures::future::join_all(futures)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
