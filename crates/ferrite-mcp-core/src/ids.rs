//! Opaque identifiers: session ids, task ids, and the counter used to mint
//! server-initiated request ids in a namespace disjoint from client ids.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, cryptographically random session identifier: unforgeable
/// and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a new id from 128 bits (16 bytes) of OS randomness, hex-encoded
    /// and URL-safe by construction. Panics only if the platform RNG is
    /// unavailable, which would indicate a broken host environment — there
    /// is no sane fallback to a weaker id.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("OS random number generator unavailable");
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("sess-{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A task id, minted by the [`crate::Context`]-independent task manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 8];
        getrandom::getrandom(&mut bytes).expect("OS random number generator unavailable");
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("task-{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Mints server-initiated request ids (`s-1`, `s-2`, ...) — a namespace
/// disjoint from whatever ids the client chooses for its own requests.
#[derive(Debug, Default)]
pub struct RequestIdSeq {
    next: AtomicU64,
}

impl RequestIdSeq {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("s-{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sess-"));
    }

    #[test]
    fn request_id_seq_is_monotonic_and_disjoint() {
        let seq = RequestIdSeq::new();
        let a = seq.next();
        let b = seq.next();
        assert_ne!(a, b);
        assert!(a.starts_with("s-"));
    }
}
