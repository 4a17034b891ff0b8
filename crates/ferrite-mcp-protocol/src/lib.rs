//! JSON-RPC framing and dispatch. This crate knows how to turn raw bytes
//! into a [`ferrite_mcp_types::JsonRpcMessage`], route it to whatever
//! implements [`RequestDispatcher`], and turn the result back into a
//! [`ferrite_mcp_types::JsonRpcResponse`]. It does not know what a tool or a
//! session is — that's `ferrite-mcp-server`'s job. It also owns correlation
//! of server-initiated requests (sampling, elicitation, roots) with their
//! eventual client responses, since that bookkeeping is purely a JSON-RPC id
//! concern.

pub mod correlation;
pub mod engine;
pub mod error;
pub mod methods;

pub use correlation::{PendingRequest, PendingRequests};
pub use engine::{Engine, RequestDispatcher};
pub use error::{Error, ProtocolResult};
