//! Runtime primitives shared by the protocol, server, and transport crates:
//! the per-request [`Context`], the [`McpError`] taxonomy, and opaque id
//! types for sessions, tasks, and server-initiated requests.

pub mod context;
pub mod error;
pub mod ids;

pub use context::{Context, ContextScope, ServerRpc};
pub use error::{McpError, McpResult};
pub use ids::{RequestIdSeq, SessionId, TaskId};

/// Protocol versions this server negotiates, most-preferred first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18", "2025-03-26"];

/// The version returned when a client declares one we don't recognize.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-11-25";
