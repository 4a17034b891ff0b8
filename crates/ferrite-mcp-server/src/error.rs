//! The outermost error layer: wraps [`ferrite_mcp_protocol::Error`] (which
//! wraps [`ferrite_mcp_core::McpError`]) and adds faults specific to the
//! registry, session manager, task manager, and process lifecycle.

use ferrite_mcp_protocol::Error as ProtocolError;
use ferrite_mcp_types::{ErrorCode, JsonRpcError};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("handler registration failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("server is not accepting new sessions: {0}")]
    Lifecycle(String),

    #[error("shutdown timed out with {0} task(s) still in flight")]
    Shutdown(usize),
}

/// Faults specific to registering a handler, surfaced at the `register_*`
/// call site rather than at dispatch time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("a handler named `{0}` is already registered for this kind")]
    DuplicateName(String),

    #[error("invalid handler name `{0}`: must be 1-128 characters matching [A-Za-z0-9_.-]+")]
    InvalidName(String),

    #[error("unsupported parameter type for `{0}`")]
    UnsupportedParameterType(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            ServerError::Protocol(inner) => inner.to_jsonrpc_error(),
            ServerError::Handler(_) | ServerError::Configuration(_) => {
                JsonRpcError::new(ErrorCode::InternalError.code(), self.to_string())
            }
            ServerError::Lifecycle(_) | ServerError::Shutdown(_) => {
                JsonRpcError::new(ErrorCode::InternalError.code(), "server is shutting down")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_message_names_the_handler() {
        let err = HandlerError::DuplicateName("add".into());
        assert!(err.to_string().contains("add"));
    }
}
