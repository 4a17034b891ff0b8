//! Correlates server-initiated requests (sampling, elicitation, roots) with
//! the client's eventual response. Server-initiated ids live in their own
//! `s-N` namespace (see [`ferrite_mcp_core::RequestIdSeq`]) so they can never
//! collide with an id the client chose for its own requests.

use std::collections::HashMap;
use std::time::Duration;

use ferrite_mcp_core::RequestIdSeq;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, ProtocolResult};

/// How long the engine will wait for a client to answer a server-initiated
/// request before giving up.
pub const CORRELATION_TIMEOUT: Duration = Duration::from_secs(120);

/// A single outstanding server-to-client request, awaiting the client's
/// response on `/mcp/respond` (HTTP) or an inbound response frame (stdio).
pub struct PendingRequest {
    rx: oneshot::Receiver<Value>,
}

impl PendingRequest {
    /// Wait for the client's answer, or time out after [`CORRELATION_TIMEOUT`].
    pub async fn wait(self) -> ProtocolResult<Value> {
        match tokio::time::timeout(CORRELATION_TIMEOUT, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::CorrelationTimeout),
            Err(_) => Err(Error::CorrelationTimeout),
        }
    }
}

/// The table of in-flight server-initiated requests for one session.
#[derive(Default)]
pub struct PendingRequests {
    seq: RequestIdSeq,
    table: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            seq: RequestIdSeq::new(),
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh `s-N` id and register a slot for its response.
    /// Returns the id to send on the wire and the future to await.
    pub fn register(&self) -> (String, PendingRequest) {
        let id = self.seq.next();
        let (tx, rx) = oneshot::channel();
        self.table.lock().insert(id.clone(), tx);
        (id, PendingRequest { rx })
    }

    /// Deliver a client response frame to the matching pending request.
    /// Returns an error if no such id is outstanding (stale or forged id).
    pub fn resolve(&self, id: &str, value: Value) -> ProtocolResult<()> {
        let sender = self
            .table
            .lock()
            .remove(id)
            .ok_or_else(|| Error::UnknownCorrelationId(id.to_string()))?;
        // The receiver may already be gone if `wait` timed out first; that's
        // not an error on the resolver's side.
        let _ = sender.send(value);
        Ok(())
    }

    /// Drop every pending slot, unblocking any in-flight `wait()` calls with
    /// an error (used when a session is torn down or the server shuts down).
    pub fn clear(&self) {
        self.table.lock().clear();
    }

    pub fn outstanding_count(&self) -> usize {
        self.table.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let pending = PendingRequests::new();
        let (id, waiting) = pending.register();
        assert!(id.starts_with("s-"));
        pending.resolve(&id, serde_json::json!({"ok": true})).unwrap();
        let value = waiting.wait().await.unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));
    }

    #[test]
    fn resolve_unknown_id_errors() {
        let pending = PendingRequests::new();
        let err = pending.resolve("s-999", Value::Null).unwrap_err();
        assert!(matches!(err, Error::UnknownCorrelationId(_)));
    }

    #[tokio::test]
    async fn clear_unblocks_waiters_with_error() {
        let pending = PendingRequests::new();
        let (_id, waiting) = pending.register();
        pending.clear();
        let err = waiting.wait().await.unwrap_err();
        assert!(matches!(err, Error::CorrelationTimeout));
    }
}
