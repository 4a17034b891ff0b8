//! The protocol-layer error type. Wraps [`McpError`] and adds faults that
//! only make sense at the JSON-RPC framing level: malformed batches,
//! oversized payloads, and id collisions.

use ferrite_mcp_core::McpError;
use ferrite_mcp_types::{ErrorCode, JsonRpcError};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] McpError),

    #[error("message exceeds the {limit} byte frame limit")]
    MessageTooLarge { limit: usize },

    #[error("empty batch")]
    EmptyBatch,

    #[error("duplicate request id in batch: {0}")]
    DuplicateId(String),

    #[error("no pending server-initiated request with id {0}")]
    UnknownCorrelationId(String),

    #[error("server-initiated request to client timed out")]
    CorrelationTimeout,
}

pub type ProtocolResult<T> = Result<T, Error>;

impl Error {
    /// Render as the `error` object of a JSON-RPC response.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Error::Core(inner) => JsonRpcError::new(inner.default_code(), inner.to_string()),
            Error::MessageTooLarge { .. } => {
                JsonRpcError::new(ErrorCode::InvalidRequest.code(), self.to_string())
            }
            Error::EmptyBatch | Error::DuplicateId(_) => {
                JsonRpcError::new(ErrorCode::InvalidRequest.code(), self.to_string())
            }
            Error::UnknownCorrelationId(_) | Error::CorrelationTimeout => {
                JsonRpcError::new(ErrorCode::InternalError.code(), self.to_string())
            }
        }
    }
}
