//! The top-level error a binary built on this crate actually has to handle:
//! either a handler failed to register, or a transport failed to start.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Server(#[from] ferrite_mcp_server::ServerError),

    #[cfg(feature = "http")]
    #[error("http transport failed: {0}")]
    Http(#[from] std::io::Error),

    #[cfg(feature = "stdio")]
    #[error("stdio transport failed: {0}")]
    Stdio(#[from] ferrite_mcp_transport_stdio::StdioError),
}

pub type Result<T> = std::result::Result<T, Error>;
