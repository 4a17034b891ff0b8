//! Shared, cheaply-cloneable state handed to every axum handler: the
//! protocol engine, the server-layer managers it drives, and the registry
//! of currently-open server-push SSE channels that outlives any single
//! request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::response::sse::Event;
use ferrite_mcp_core::{SessionId, TaskId};
use ferrite_mcp_protocol::Engine;
use ferrite_mcp_server::task::TaskStatus;
use ferrite_mcp_server::{Dispatcher, HandlerRegistry, ServerConfig, SessionManager, TaskManager};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

/// One entry per session with a currently-open GET `/mcp` stream or an
/// in-flight `tools/call` SSE response — wherever a session's server-to-client
/// pushes are flowing right now.
pub(crate) type LiveStreams = Arc<Mutex<HashMap<SessionId, mpsc::UnboundedSender<Event>>>>;

struct Inner {
    engine: Engine<Arc<Dispatcher>>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskManager>,
    registry: Arc<HandlerRegistry>,
    config: Arc<ServerConfig>,
    live_streams: LiveStreams,
    started_at: Instant,
}

/// Everything an axum handler needs, behind one cheap `Arc` clone per request.
#[derive(Clone)]
pub struct AppState(Arc<Inner>);

impl AppState {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionManager>,
        tasks: Arc<TaskManager>,
        registry: Arc<HandlerRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let max_message_bytes = config.max_message_bytes;
        let live_streams: LiveStreams = Arc::new(Mutex::new(HashMap::new()));

        let evicted_tasks = tasks.clone();
        let evicted_streams = live_streams.clone();
        sessions.set_on_evict(Arc::new(move |id: &SessionId| {
            evicted_tasks.purge_session(id);
            evicted_streams.lock().remove(id);
        }));

        let status_sessions = sessions.clone();
        let status_streams = live_streams.clone();
        tasks.set_on_status_change(Arc::new(move |session_id: &SessionId, task_id: &TaskId, status: TaskStatus| {
            let live = status_streams.lock();
            if let Some(sender) = live.get(session_id) {
                let payload = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/tasks/status",
                    "params": {"taskId": task_id.as_str(), "status": status},
                });
                crate::sse::emit(&status_sessions, session_id, "server_notification", &payload, sender);
            }
        }));

        Self(Arc::new(Inner {
            engine: Engine::new(dispatcher.clone(), max_message_bytes),
            dispatcher,
            sessions,
            tasks,
            registry,
            config,
            live_streams,
            started_at: Instant::now(),
        }))
    }

    pub(crate) fn engine(&self) -> &Engine<Arc<Dispatcher>> {
        &self.0.engine
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.0.dispatcher
    }

    pub(crate) fn sessions(&self) -> &SessionManager {
        &self.0.sessions
    }

    pub(crate) fn sessions_arc(&self) -> Arc<SessionManager> {
        self.0.sessions.clone()
    }

    pub(crate) fn tasks(&self) -> &TaskManager {
        &self.0.tasks
    }

    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.0.registry
    }

    pub(crate) fn config(&self) -> &ServerConfig {
        &self.0.config
    }

    pub(crate) fn live_streams(&self) -> &LiveStreams {
        &self.0.live_streams
    }

    pub(crate) fn started_at(&self) -> Instant {
        self.0.started_at
    }
}
