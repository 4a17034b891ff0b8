//! Wire types for the Model Context Protocol.
//!
//! This crate has no knowledge of dispatch, sessions, or transports — it is
//! the shared vocabulary that `ferrite-mcp-protocol`, `ferrite-mcp-server`
//! and both transport crates serialize and deserialize. Keeping it
//! dependency-light (`serde` + `serde_json` + `thiserror`) means it can be
//! reused by a client implementation without dragging in the server stack.

pub mod content;
pub mod error_code;
pub mod handler;
pub mod jsonrpc;
pub mod schema;

pub use content::*;
pub use error_code::ErrorCode;
pub use handler::*;
pub use jsonrpc::*;
pub use schema::*;
