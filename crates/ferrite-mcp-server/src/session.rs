//! Session allocation, lookup, eviction, and the per-session state that
//! rides along with a session: subscriptions, the SSE replay buffer, and
//! the rate bucket.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ferrite_mcp_core::SessionId;
use ferrite_mcp_protocol::PendingRequests;
use ferrite_mcp_types::ClientCapabilities;
use parking_lot::Mutex;

use crate::rate_limit::RateBucket;

const SSE_BUFFER_MAX_EVENTS: usize = 1024;
const SSE_BUFFER_MAX_AGE: Duration = Duration::from_secs(5 * 60);
const SWEEP_EVERY_N_CREATIONS: u64 = 100;
const EVICTION_GRACE: Duration = Duration::from_secs(30);

/// One buffered SSE frame, keyed by a monotonic per-session event id so a
/// reconnecting client can ask to replay everything after the last one it
/// saw (`Last-Event-ID`).
#[derive(Clone)]
pub struct StoredEvent {
    pub event_id: u64,
    pub payload: Bytes,
    stored_at: Instant,
}

/// A bounded ring of recent SSE frames for one session's server-push stream.
#[derive(Default)]
pub struct SseBuffer {
    events: VecDeque<StoredEvent>,
    next_id: u64,
}

impl SseBuffer {
    fn push(&mut self, payload: Bytes) -> u64 {
        let event_id = self.next_id;
        self.next_id += 1;
        self.events.push_back(StoredEvent {
            event_id,
            payload,
            stored_at: Instant::now(),
        });
        self.trim();
        event_id
    }

    fn trim(&mut self) {
        while self.events.len() > SSE_BUFFER_MAX_EVENTS {
            self.events.pop_front();
        }
        let cutoff = Instant::now() - SSE_BUFFER_MAX_AGE;
        while matches!(self.events.front(), Some(e) if e.stored_at < cutoff) {
            self.events.pop_front();
        }
    }

    /// Every buffered event with id strictly greater than `last_event_id`,
    /// oldest first.
    pub fn replay_after(&self, last_event_id: u64) -> Vec<StoredEvent> {
        self.events
            .iter()
            .filter(|e| e.event_id > last_event_id)
            .cloned()
            .collect()
    }
}

/// Per-session state beyond the identity fields themselves.
pub struct Session {
    pub id: SessionId,
    pub protocol_version: String,
    pub client_capabilities: ClientCapabilities,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub initialized: bool,
    /// Set while a GET /mcp server-push stream is open; suppresses LRU
    /// eviction but not idle-expiry (see the module-level note on the
    /// session sweeper's precedence).
    pub protected: bool,
    pub subscriptions: HashSet<String>,
    pub sse_buffer: SseBuffer,
    pub rate_bucket: Option<RateBucket>,
    pub pending_requests: Arc<PendingRequests>,
}

impl Session {
    fn new(id: SessionId, protocol_version: String, client_capabilities: ClientCapabilities) -> Self {
        let now = Instant::now();
        Self {
            id,
            protocol_version,
            client_capabilities,
            created_at: now,
            last_activity: now,
            initialized: false,
            protected: false,
            subscriptions: HashSet::new(),
            sse_buffer: SseBuffer::default(),
            rate_bucket: None,
            pending_requests: Arc::new(PendingRequests::new()),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn push_sse_event(&mut self, payload: Bytes) -> u64 {
        self.touch();
        self.sse_buffer.push(payload)
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

type OnEvict = Arc<dyn Fn(&SessionId) + Send + Sync>;

struct Table {
    sessions: HashMap<SessionId, Session>,
    creations_since_sweep: u64,
}

/// Allocates, looks up, and evicts sessions. All mutation is serialized by
/// a single `parking_lot::Mutex` — sessions are small and looked up
/// frequently, but not a contention point at the throughput this framework
/// targets.
pub struct SessionManager {
    table: Mutex<Table>,
    capacity: usize,
    ttl: Duration,
    on_evict: Mutex<Option<OnEvict>>,
}

impl SessionManager {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            table: Mutex::new(Table {
                sessions: HashMap::new(),
                creations_since_sweep: 0,
            }),
            capacity,
            ttl,
            on_evict: Mutex::new(None),
        }
    }

    /// Register the callback invoked (outside the session lock) whenever a
    /// session is evicted or expires, so callers can purge task/subscription
    /// state that lives elsewhere.
    pub fn set_on_evict(&self, callback: OnEvict) {
        *self.on_evict.lock() = Some(callback);
    }

    pub fn create(&self, protocol_version: String, client_capabilities: ClientCapabilities) -> SessionId {
        let id = SessionId::new();
        let session = Session::new(id.clone(), protocol_version, client_capabilities);
        let evicted = {
            let mut table = self.table.lock();
            table.sessions.insert(id.clone(), session);
            table.creations_since_sweep += 1;
            if table.creations_since_sweep >= SWEEP_EVERY_N_CREATIONS {
                table.creations_since_sweep = 0;
                self.sweep_locked(&mut table)
            } else {
                Vec::new()
            }
        };
        self.notify_evicted(&evicted);
        id
    }

    /// Run the idle-expiry and capacity-eviction sweep immediately, without
    /// waiting for the creation counter to trip it. Used by `get`/`touch` on
    /// read paths that want a fresher view, and by tests.
    pub fn sweep_now(&self) {
        let evicted = {
            let mut table = self.table.lock();
            self.sweep_locked(&mut table)
        };
        self.notify_evicted(&evicted);
    }

    fn sweep_locked(&self, table: &mut Table) -> Vec<SessionId> {
        let mut evicted = Vec::new();

        // Idle-expiry runs first and ignores `protected`: a stream left open
        // with no traffic for the full TTL is still idle.
        let ttl = self.ttl;
        let expired: Vec<SessionId> = table
            .sessions
            .iter()
            .filter(|(_, s)| s.idle_for() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            table.sessions.remove(&id);
            evicted.push(id);
        }

        // Capacity eviction: oldest unprotected session first; if every
        // session is protected, fall back to the global oldest with a grace
        // window so a just-opened stream isn't immediately punished.
        while table.sessions.len() > self.capacity {
            let victim = table
                .sessions
                .iter()
                .filter(|(_, s)| !s.protected)
                .min_by_key(|(_, s)| s.last_activity)
                .map(|(id, _)| id.clone())
                .or_else(|| {
                    table
                        .sessions
                        .iter()
                        .filter(|(_, s)| s.idle_for() >= EVICTION_GRACE)
                        .min_by_key(|(_, s)| s.last_activity)
                        .map(|(id, _)| id.clone())
                });
            match victim {
                Some(id) => {
                    table.sessions.remove(&id);
                    evicted.push(id);
                }
                None => break,
            }
        }

        evicted
    }

    fn notify_evicted(&self, ids: &[SessionId]) {
        if ids.is_empty() {
            return;
        }
        if let Some(callback) = self.on_evict.lock().as_ref() {
            for id in ids {
                callback(id);
            }
        }
    }

    pub fn mark_initialized(&self, id: &SessionId) {
        if let Some(session) = self.table.lock().sessions.get_mut(id) {
            session.initialized = true;
        }
    }

    pub fn is_initialized(&self, id: &SessionId) -> bool {
        self.table
            .lock()
            .sessions
            .get(id)
            .map(|s| s.initialized)
            .unwrap_or(false)
    }

    pub fn touch(&self, id: &SessionId) -> bool {
        if let Some(session) = self.table.lock().sessions.get_mut(id) {
            session.touch();
            true
        } else {
            false
        }
    }

    pub fn set_protected(&self, id: &SessionId, protected: bool) {
        if let Some(session) = self.table.lock().sessions.get_mut(id) {
            session.protected = protected;
        }
    }

    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.table.lock().sessions.get_mut(id).map(f)
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        self.table.lock().sessions.contains_key(id)
    }

    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.table.lock().sessions.remove(id).is_some();
        if removed {
            self.notify_evicted(std::slice::from_ref(id));
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.table.lock().sessions.len()
    }

    /// Every session currently subscribed to `uri`, for fanning out a
    /// `notifications/resources/updated` push.
    pub fn sessions_subscribed_to(&self, uri: &str) -> Vec<SessionId> {
        self.table
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| s.subscriptions.contains(uri))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop every session (used during graceful shutdown).
    pub fn clear(&self) {
        let ids: Vec<SessionId> = {
            let mut table = self.table.lock();
            let ids = table.sessions.keys().cloned().collect();
            table.sessions.clear();
            ids
        };
        self.notify_evicted(&ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(capacity: usize, ttl: Duration) -> SessionManager {
        SessionManager::new(capacity, ttl)
    }

    #[test]
    fn create_and_lookup_round_trips() {
        let mgr = manager(10, Duration::from_secs(3600));
        let id = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        assert!(mgr.exists(&id));
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn last_activity_is_monotonic() {
        let mgr = manager(10, Duration::from_secs(3600));
        let id = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        let first = mgr.with_session(&id, |s| s.last_activity).unwrap();
        mgr.touch(&id);
        let second = mgr.with_session(&id, |s| s.last_activity).unwrap();
        assert!(second >= first);
    }

    #[test]
    fn idle_expiry_evicts_regardless_of_protected() {
        let mgr = manager(10, Duration::from_millis(1));
        let id = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        mgr.set_protected(&id, true);
        std::thread::sleep(Duration::from_millis(5));
        mgr.sweep_now();
        assert!(!mgr.exists(&id));
    }

    #[test]
    fn capacity_eviction_prefers_unprotected() {
        let mgr = manager(1, Duration::from_secs(3600));
        let protected_id = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        mgr.set_protected(&protected_id, true);
        std::thread::sleep(Duration::from_millis(2));
        let unprotected_id = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        mgr.sweep_now();
        assert!(mgr.exists(&protected_id));
        assert!(!mgr.exists(&unprotected_id) || mgr.count() <= 1);
    }

    #[test]
    fn eviction_triggers_cleanup_callback() {
        let mgr = manager(10, Duration::from_millis(1));
        let evicted_count = Arc::new(AtomicUsize::new(0));
        let counter = evicted_count.clone();
        mgr.set_on_evict(Arc::new(move |_id| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        mgr.create("2025-11-25".into(), ClientCapabilities::default());
        std::thread::sleep(Duration::from_millis(5));
        mgr.sweep_now();
        assert_eq!(evicted_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sessions_subscribed_to_filters_by_uri() {
        let mgr = manager(10, Duration::from_secs(3600));
        let subscribed = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        let other = mgr.create("2025-11-25".into(), ClientCapabilities::default());
        mgr.with_session(&subscribed, |s| {
            s.subscriptions.insert("file:///a".to_string());
        });
        mgr.with_session(&other, |s| {
            s.subscriptions.insert("file:///b".to_string());
        });

        let matches = mgr.sessions_subscribed_to("file:///a");
        assert_eq!(matches, vec![subscribed]);
    }

    #[test]
    fn sse_replay_returns_only_newer_events() {
        let mut buffer = SseBuffer::default();
        buffer.push(Bytes::from_static(b"one"));
        let second_id = buffer.push(Bytes::from_static(b"two"));
        buffer.push(Bytes::from_static(b"three"));
        let replay = buffer.replay_after(second_id);
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].payload, Bytes::from_static(b"three"));
    }
}
