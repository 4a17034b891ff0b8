//! Server configuration: compiled-in defaults, layered with environment
//! variables, and finally with explicit builder overrides — the last of
//! which always wins. Loaded exactly once, at `ServerBuilder::build()`, and
//! never mutated or re-polled afterward.

use std::time::Duration;

/// Default protocol versions this server negotiates, most-preferred first.
pub const DEFAULT_PROTOCOL_VERSIONS: &[&str] = ferrite_mcp_core::SUPPORTED_PROTOCOL_VERSIONS;

const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_SESSION_CAPACITY: usize = 1000;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Server identity, as reported back in `initialize` and `/health`.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub website_url: Option<String>,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: "ferrite-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            title: None,
            description: None,
            website_url: None,
        }
    }
}

/// Fully resolved server configuration. See the module docs for the
/// layering order that produces one of these.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub identity: ServerIdentity,
    pub session_ttl: Duration,
    pub session_capacity: usize,
    pub max_message_bytes: usize,
    pub shutdown_timeout: Duration,
    pub log_level: String,
    pub transport: TransportKind,
    pub port: u16,
    /// Reject every method but `initialize`/`ping` until the client sends
    /// `notifications/initialized`. Defaults on; a client integrating
    /// against a permissive test harness may want it off.
    pub strict_session_gating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Stdio,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            identity: ServerIdentity::default(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            session_capacity: DEFAULT_SESSION_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            log_level: "info".into(),
            transport: TransportKind::Http,
            port: 8080,
            strict_session_gating: true,
        }
    }
}

/// Builds a [`ServerConfig`] by layering environment variables over
/// compiled-in defaults, with explicit setter calls always taking final
/// precedence over both.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Start from compiled-in defaults overridden by whatever recognized
    /// environment variables are currently set.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        builder.apply_env();
        builder
    }

    fn apply_env(&mut self) {
        if let Ok(name) = std::env::var("MCP_SERVER_NAME") {
            self.config.identity.name = name;
        }
        if let Ok(version) = std::env::var("MCP_SERVER_VERSION") {
            self.config.identity.version = version;
        }
        if let Ok(ttl) = std::env::var("MCP_SESSION_TTL_SECS") {
            if let Ok(secs) = ttl.parse() {
                self.config.session_ttl = Duration::from_secs(secs);
            }
        }
        if let Ok(cap) = std::env::var("MCP_SESSION_CAPACITY") {
            if let Ok(cap) = cap.parse() {
                self.config.session_capacity = cap;
            }
        }
        if let Ok(bytes) = std::env::var("MCP_MAX_MESSAGE_BYTES") {
            if let Ok(bytes) = bytes.parse() {
                self.config.max_message_bytes = bytes;
            }
        }
        if let Ok(secs) = std::env::var("MCP_SHUTDOWN_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.config.shutdown_timeout = Duration::from_secs(secs);
            }
        }
        // RUST_LOG takes precedence over MCP_LOG_LEVEL when both are set —
        // check it last so it overwrites.
        if let Ok(level) = std::env::var("MCP_LOG_LEVEL") {
            self.config.log_level = level;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.config.log_level = level;
        }
        if std::env::var("MCP_STDIO").is_ok() || std::env::var("USE_STDIO").is_ok() {
            self.config.transport = TransportKind::Stdio;
        }
        if let Ok(transport) = std::env::var("MCP_TRANSPORT") {
            self.config.transport = match transport.as_str() {
                "stdio" => TransportKind::Stdio,
                _ => TransportKind::Http,
            };
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.config.port = port;
            }
        }
        if let Ok(strict) = std::env::var("MCP_STRICT_SESSION_GATING") {
            self.config.strict_session_gating = strict != "0" && strict.to_lowercase() != "false";
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.identity.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.identity.version = version.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.identity.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.identity.description = Some(description.into());
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn session_capacity(mut self, capacity: usize) -> Self {
        self.config.session_capacity = capacity;
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.config.max_message_bytes = bytes;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn strict_session_gating(mut self, enabled: bool) -> Self {
        self.config.strict_session_gating = enabled;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.session_capacity, 1000);
        assert_eq!(config.max_message_bytes, 10 * 1024 * 1024);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_override_beats_default() {
        let config = ServerConfigBuilder::default()
            .session_ttl(Duration::from_secs(60))
            .build();
        assert_eq!(config.session_ttl, Duration::from_secs(60));
    }

    #[test]
    fn explicit_builder_call_beats_environment() {
        std::env::set_var("MCP_SESSION_TTL_SECS", "120");
        let config = ServerConfigBuilder::from_env()
            .session_ttl(Duration::from_secs(999))
            .build();
        std::env::remove_var("MCP_SESSION_TTL_SECS");
        assert_eq!(config.session_ttl, Duration::from_secs(999));
    }

    #[test]
    fn environment_beats_compiled_default_when_builder_silent() {
        std::env::set_var("MCP_SESSION_CAPACITY", "42");
        let config = ServerConfigBuilder::from_env().build();
        std::env::remove_var("MCP_SESSION_CAPACITY");
        assert_eq!(config.session_capacity, 42);
    }
}
