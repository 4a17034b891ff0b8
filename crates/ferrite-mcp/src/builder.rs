use std::sync::Arc;
use std::time::Duration;

use ferrite_mcp_server::{
    auth::TokenValidator, logging, Dispatcher, HandlerRegistry, PromptOptions, ResourceOptions,
    ResourceTemplateOptions, ServerConfig, ServerConfigBuilder, ServerResult, SessionManager, TaskManager,
    ToolOptions, TransportKind,
};
use ferrite_mcp_types::FieldSpec;

use crate::error::{Error, Result};

/// Registers handlers and assembles the shared dispatch core; [`build`](Self::build)
/// hands back a [`FerriteServer`] ready to serve over whichever transport
/// `config.transport` names.
///
/// Configuration layers compiled-in defaults, then `MCP_*`/`PORT`/`RUST_LOG`
/// environment variables (see [`ferrite_mcp_server::ServerConfigBuilder::from_env`]),
/// then whatever setters are called here — the last of the three always wins.
pub struct ServerBuilder {
    config: ServerConfigBuilder,
    registry: Arc<HandlerRegistry>,
    token_validator: Option<Arc<dyn TokenValidator>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfigBuilder::from_env(),
            registry: Arc::new(HandlerRegistry::new()),
            token_validator: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.name(name);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config = self.config.version(version);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config = self.config.description(description);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config = self.config.port(port);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config = self.config.log_level(level);
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config = self.config.session_ttl(ttl);
        self
    }

    pub fn session_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.session_capacity(capacity);
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.max_message_bytes(bytes);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.shutdown_timeout(timeout);
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config = self.config.transport(transport);
        self
    }

    /// Disable the default requirement that a session send
    /// `notifications/initialized` before anything but `initialize`/`ping`
    /// is dispatched. Most integrations should leave this on.
    pub fn strict_session_gating(mut self, enabled: bool) -> Self {
        self.config = self.config.strict_session_gating(enabled);
        self
    }

    /// Require a bearer token on every `tools/call` and validate it through
    /// `validator`. Unset by default: tool calls are unauthenticated unless
    /// a tool's own `ToolOptions::requires_auth` and this are both set.
    pub fn token_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.token_validator = Some(validator);
        self
    }

    pub fn register_tool(
        self,
        name: impl Into<String>,
        fields: &[FieldSpec],
        handler: ferrite_mcp_server::registry::ToolFn,
        options: ToolOptions,
    ) -> ServerResult<Self> {
        self.registry.register_tool(name, fields, handler, options)?;
        Ok(self)
    }

    pub fn register_resource(
        self,
        uri: impl Into<String>,
        handler: ferrite_mcp_server::registry::ResourceFn,
        options: ResourceOptions,
    ) -> ServerResult<Self> {
        self.registry.register_resource(uri, handler, options)?;
        Ok(self)
    }

    pub fn register_resource_template(
        self,
        uri_template: impl Into<String>,
        handler: ferrite_mcp_server::registry::ResourceTemplateFn,
        options: ResourceTemplateOptions,
    ) -> ServerResult<Self> {
        self.registry.register_resource_template(uri_template, handler, options)?;
        Ok(self)
    }

    pub fn register_prompt(
        self,
        name: impl Into<String>,
        handler: ferrite_mcp_server::registry::PromptFn,
        options: PromptOptions,
    ) -> ServerResult<Self> {
        self.registry.register_prompt(name, handler, options)?;
        Ok(self)
    }

    pub fn build(self) -> FerriteServer {
        let config = Arc::new(self.config.build());
        let sessions = Arc::new(SessionManager::new(config.session_capacity, config.session_ttl));
        let tasks = Arc::new(TaskManager::new());

        let logging = match config.transport {
            // Stdout is the JSON-RPC wire over stdio; every log line goes to stderr instead.
            TransportKind::Stdio => logging::init_to_writer(&config.log_level, std::io::stderr),
            TransportKind::Http => logging::init(&config.log_level),
        };

        let mut dispatcher = Dispatcher::new(self.registry.clone(), sessions.clone(), tasks.clone(), config.clone())
            .with_logging_handle(Arc::new(logging));
        if let Some(validator) = self.token_validator {
            dispatcher = dispatcher.with_token_validator(validator);
        }

        FerriteServer {
            dispatcher: Arc::new(dispatcher),
            sessions,
            tasks,
            registry: self.registry,
            config,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully assembled server, its handlers registered and its dispatch core
/// built, ready to run over one or both transports.
pub struct FerriteServer {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskManager>,
    #[allow(dead_code)]
    registry: Arc<HandlerRegistry>,
    config: Arc<ServerConfig>,
}

impl FerriteServer {
    /// Serve over whichever transport `config.transport` names (`MCP_TRANSPORT`,
    /// `MCP_STDIO`/`USE_STDIO`, or [`ServerBuilder::transport`] — see
    /// [`ferrite_mcp_server::ServerConfigBuilder::from_env`] for precedence).
    pub async fn serve(self) -> Result<()> {
        match self.config.transport {
            TransportKind::Http => self.serve_http().await,
            TransportKind::Stdio => self.serve_stdio().await,
        }
    }

    #[cfg(feature = "http")]
    pub async fn serve_http(&self) -> Result<()> {
        let transport = ferrite_mcp_transport_http::HttpTransport::new(
            self.dispatcher.clone(),
            self.sessions.clone(),
            self.tasks.clone(),
            self.registry.clone(),
            self.config.clone(),
        );
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.port));
        transport.serve(addr).await.map_err(Error::Http)
    }

    #[cfg(not(feature = "http"))]
    pub async fn serve_http(&self) -> Result<()> {
        Err(Error::Server(ferrite_mcp_server::ServerError::Configuration(
            "the `http` feature is disabled".into(),
        )))
    }

    #[cfg(feature = "stdio")]
    pub async fn serve_stdio(&self) -> Result<()> {
        let transport = Arc::new(ferrite_mcp_transport_stdio::StdioTransport::new(
            self.dispatcher.clone(),
            self.sessions.clone(),
            self.tasks.clone(),
            self.registry.clone(),
            self.config.clone(),
        ));
        transport.serve().await.map_err(Error::Stdio)
    }

    #[cfg(not(feature = "stdio"))]
    pub async fn serve_stdio(&self) -> Result<()> {
        Err(Error::Server(ferrite_mcp_server::ServerError::Configuration(
            "the `stdio` feature is disabled".into(),
        )))
    }
}
