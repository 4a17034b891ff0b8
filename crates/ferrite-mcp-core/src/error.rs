//! The core error taxonomy. This is the innermost of three layers: this
//! enum covers faults that can occur independent of JSON-RPC framing or
//! HTTP/stdio transport; `ferrite-mcp-protocol::Error` wraps it to add
//! request/response framing, and `ferrite-mcp-server::ServerError` wraps
//! that again to add registry- and session-level faults.

use thiserror::Error;

/// Everything that can go wrong evaluating a single handler call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum McpError {
    #[error("failed to parse message body: {0}")]
    ParseError(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid parameter `{param_name}`: expected {expected_type}, got {observed}")]
    ParameterValidation {
        param_name: String,
        expected_type: String,
        observed: String,
    },

    #[error("no such tool: {0}")]
    ToolNotFound(String),

    #[error("no such resource: {0}")]
    ResourceNotFound(String),

    #[error("no such prompt: {0}")]
    PromptNotFound(String),

    #[error("client did not declare the `{0}` capability")]
    CapabilityUnavailable(String),

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("missing required scope: {0}")]
    ForbiddenScope(String),

    #[error("caller must complete elicitation at {url}: {description}")]
    UrlElicitationRequired { url: String, description: String },

    #[error("server-initiated request to client timed out after {0}ms")]
    TransportTimeout(u64),

    #[error("server is shutting down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// The default JSON-RPC error code this variant maps to. The protocol
    /// layer may override it (e.g. a handler-thrown application error keeps
    /// its own code), but this is the fallback used for framework faults.
    pub fn default_code(&self) -> i32 {
        use ferrite_mcp_types::ErrorCode;
        let code = match self {
            Self::ParseError(_) => ErrorCode::ParseError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::ParameterValidation { .. } => ErrorCode::InvalidParams,
            Self::ToolNotFound(_) | Self::ResourceNotFound(_) | Self::PromptNotFound(_) => {
                ErrorCode::InvalidParams
            }
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::ForbiddenScope(_) => ErrorCode::ForbiddenScope,
            Self::UrlElicitationRequired { .. } => ErrorCode::UrlElicitationRequired,
            Self::CapabilityUnavailable(_)
            | Self::TransportTimeout(_)
            | Self::Shutdown
            | Self::Internal(_) => ErrorCode::InternalError,
        };
        code.code()
    }
}

pub type McpResult<T> = Result<T, McpError>;
