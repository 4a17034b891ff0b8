//! Rust SDK for the Model Context Protocol.
//!
//! Register tools, resources, and prompts against a [`ServerBuilder`], then
//! hand the assembled [`FerriteServer`] to [`FerriteServer::serve`] (or one
//! of [`FerriteServer::serve_http`]/[`FerriteServer::serve_stdio`] directly)
//! to start answering requests. Everything below the builder — wire types,
//! dispatch, sessions, and the two transports — lives in its own crate and
//! can be depended on independently; this one just wires them together with
//! an ergonomic front door and environment-variable bootstrap.
//!
//! ```no_run
//! use ferrite_mcp::ServerBuilder;
//! use ferrite_mcp_server::ToolOptions;
//! use ferrite_mcp_types::{FieldSpec, FieldType};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ferrite_mcp::Result<()> {
//!     let server = ServerBuilder::new()
//!         .name("weather")
//!         .version("0.1.0")
//!         .register_tool(
//!             "get_forecast",
//!             &[FieldSpec::new("city", FieldType::String)],
//!             std::sync::Arc::new(|_ctx, args| {
//!                 Box::pin(async move {
//!                     let city = args.get("city").and_then(|v| v.as_str()).unwrap_or("unknown");
//!                     Ok(json!({"forecast": format!("sunny in {city}")}))
//!                 })
//!             }),
//!             ToolOptions::default(),
//!         )?
//!         .build();
//!
//!     server.serve().await
//! }
//! ```
//!
//! Which transport runs is decided by `MCP_TRANSPORT` (`http` or `stdio`),
//! `MCP_STDIO`/`USE_STDIO`, or [`ServerBuilder::transport`] if none of those
//! are set — see [`ferrite_mcp_server::ServerConfigBuilder::from_env`] for
//! the full environment variable list and precedence rules.

mod builder;
mod error;

pub use builder::{FerriteServer, ServerBuilder};
pub use error::{Error, Result};

pub use ferrite_mcp_core::{Context, McpError, McpResult, SessionId, TaskId};
pub use ferrite_mcp_server::{
    HandlerRegistry, PromptOptions, ResourceOptions, ResourceTemplateOptions, ServerConfig,
    ServerConfigBuilder, ServerError, ServerIdentity, ServerResult, TransportKind,
};

#[cfg(feature = "http")]
pub use ferrite_mcp_transport_http::HttpTransport;
#[cfg(feature = "stdio")]
pub use ferrite_mcp_transport_stdio::StdioTransport;
