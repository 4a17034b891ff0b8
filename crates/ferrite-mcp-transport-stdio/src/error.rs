//! Failures specific to the stdio transport itself, as opposed to a
//! protocol- or application-level [`ferrite_mcp_core::McpError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StdioError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
