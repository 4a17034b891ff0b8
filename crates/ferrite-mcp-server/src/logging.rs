//! Tracing setup. Every inbound request gets a `mcp.request` span; every
//! `tools/call` opens a child `mcp.tool.<name>` span. `logging/setLevel`
//! reloads the active filter at runtime via a `tracing_subscriber::reload`
//! handle rather than restarting the subscriber.
//!
//! With the `otel` feature disabled (the default), this module pulls in
//! nothing beyond `tracing`/`tracing-subscriber` — the framework never
//! requires the `opentelemetry` crate to compile or run.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Maps an MCP `logging/setLevel` value to the `tracing::Level` threshold
/// that should be active afterward. MCP distinguishes eight syslog-style
/// severities; `tracing` has five, so several MCP levels collapse onto the
/// same `tracing` threshold (anything at `error` or more severe becomes
/// `ERROR`).
pub fn mcp_level_to_tracing(level: &str) -> Option<tracing::Level> {
    let level = match level {
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "notice" => tracing::Level::INFO,
        "warning" => tracing::Level::WARN,
        "error" | "critical" | "alert" | "emergency" => tracing::Level::ERROR,
        _ => return None,
    };
    Some(level)
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("unrecognized MCP logging level: {0}")]
    UnrecognizedLevel(String),
    #[error("failed to reload tracing filter")]
    ReloadFailed,
}

/// Returned by [`init`]; holds the handle needed to service
/// `logging/setLevel` for the lifetime of the process.
pub struct LoggingHandle {
    reload: reload::Handle<EnvFilter, Registry>,
}

impl LoggingHandle {
    pub fn set_mcp_level(&self, mcp_level: &str) -> Result<(), LoggingError> {
        let level = mcp_level_to_tracing(mcp_level)
            .ok_or_else(|| LoggingError::UnrecognizedLevel(mcp_level.to_string()))?;
        let filter = EnvFilter::new(level.to_string());
        self.reload.reload(filter).map_err(|_| LoggingError::ReloadFailed)
    }
}

/// Install the global tracing subscriber. `initial_filter` is the
/// already-layered value from [`crate::config::ServerConfig::log_level`]
/// (itself `RUST_LOG`, then `MCP_LOG_LEVEL`, then the compiled-in default).
///
/// Equivalent to [`init_to_writer`] with `std::io::stdout`. Only correct for
/// transports that don't themselves speak on stdout.
pub fn init(initial_filter: &str) -> LoggingHandle {
    init_to_writer(initial_filter, std::io::stdout)
}

/// Install the global tracing subscriber with an explicit writer. The stdio
/// transport reserves stdout for the JSON-RPC wire, so a process serving
/// over stdio must call this with `std::io::stderr` instead of [`init`].
pub fn init_to_writer<W>(initial_filter: &str, make_writer: W) -> LoggingHandle
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(initial_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let subscriber = Registry::default()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer));

    #[cfg(feature = "otel")]
    let subscriber = {
        use opentelemetry::trace::TracerProvider as _;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .expect("failed to build OTLP span exporter");
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_simple_exporter(exporter)
            .build();
        let tracer = provider.tracer("ferrite-mcp");
        subscriber.with(tracing_opentelemetry::layer().with_tracer(tracer))
    };

    // try_init rather than init: a process that builds more than one server
    // (embedding this crate twice, or a test binary) would otherwise panic
    // the second time through. The reload handle is still returned so
    // `logging/setLevel` has something to call, even when it can no longer
    // affect the subscriber that actually won.
    if let Err(err) = subscriber.try_init() {
        tracing::debug!(%err, "global tracing subscriber already installed, skipping");
    }
    LoggingHandle { reload: handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mcp_level_maps_to_a_tracing_level() {
        for level in ["debug", "info", "notice", "warning", "error", "critical", "alert", "emergency"] {
            assert!(mcp_level_to_tracing(level).is_some(), "missing mapping for {level}");
        }
    }

    #[test]
    fn more_severe_levels_collapse_onto_error() {
        assert_eq!(mcp_level_to_tracing("critical"), Some(tracing::Level::ERROR));
        assert_eq!(mcp_level_to_tracing("alert"), Some(tracing::Level::ERROR));
        assert_eq!(mcp_level_to_tracing("emergency"), Some(tracing::Level::ERROR));
    }

    #[test]
    fn unknown_level_rejected() {
        assert!(mcp_level_to_tracing("verbose").is_none());
    }
}
