//! The long-running task state machine: `working -> completed | failed |
//! cancelled`. Transitions are monotonic; a terminal task never changes
//! state again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrite_mcp_core::{SessionId, TaskId};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const RETENTION_AFTER_TERMINAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Working)
    }
}

pub struct Task {
    pub id: TaskId,
    pub session_id: SessionId,
    pub tool_name: String,
    pub status: TaskStatus,
    pub created_at: Instant,
    terminal_at: Option<Instant>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub cancellation: CancellationToken,
}

/// Error returned for an operation that assumes a task is still `working`
/// (e.g. trying to complete an already-cancelled task).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {0} is already in a terminal state")]
    AlreadyTerminal(String),
    #[error("task {0} has not reached a terminal state")]
    NotTerminal(String),
}

#[derive(Default)]
struct Table {
    tasks: HashMap<TaskId, Task>,
}

/// Invoked (outside the task-table lock) whenever a task reaches or changes
/// terminal state, so a transport can push `notifications/tasks/status` down
/// whatever session-scoped channel it owns.
type OnStatusChange = Arc<dyn Fn(&SessionId, &TaskId, TaskStatus) + Send + Sync>;

/// Tracks every long-running tool invocation's state. A lazy sweep (no
/// background timer) runs on each `create`/`get` call and drops tasks whose
/// session no longer exists or that have sat in a terminal state past the
/// retention window.
pub struct TaskManager {
    table: Mutex<Table>,
    on_status_change: Mutex<Option<OnStatusChange>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            on_status_change: Mutex::new(None),
        }
    }

    /// Register the callback invoked (outside the task lock) whenever a
    /// task's status changes, so transports can notify the owning session.
    pub fn set_on_status_change(&self, callback: OnStatusChange) {
        *self.on_status_change.lock() = Some(callback);
    }

    fn notify_status_change(&self, session_id: &SessionId, id: &TaskId, status: TaskStatus) {
        if let Some(callback) = self.on_status_change.lock().as_ref() {
            callback(session_id, id, status);
        }
    }

    fn sweep_locked(table: &mut Table) {
        let now = Instant::now();
        table.tasks.retain(|_, task| match task.terminal_at {
            Some(terminal_at) => now.duration_since(terminal_at) < RETENTION_AFTER_TERMINAL,
            None => true,
        });
    }

    pub fn create(&self, session_id: SessionId, tool_name: impl Into<String>) -> TaskId {
        let id = TaskId::new();
        let task = Task {
            id: id.clone(),
            session_id,
            tool_name: tool_name.into(),
            status: TaskStatus::Working,
            created_at: Instant::now(),
            terminal_at: None,
            result: None,
            error: None,
            cancellation: CancellationToken::new(),
        };
        let mut table = self.table.lock();
        Self::sweep_locked(&mut table);
        table.tasks.insert(id.clone(), task);
        id
    }

    fn transition(&self, id: &TaskId, status: TaskStatus, result: Option<Value>, error: Option<String>) -> Result<(), TaskError> {
        let session_id = {
            let mut table = self.table.lock();
            let task = table
                .tasks
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if task.status.is_terminal() {
                return Err(TaskError::AlreadyTerminal(id.to_string()));
            }
            task.status = status;
            task.result = result;
            task.error = error;
            task.terminal_at = Some(Instant::now());
            task.session_id.clone()
        };
        self.notify_status_change(&session_id, id, status);
        Ok(())
    }

    pub fn set_result(&self, id: &TaskId, result: Value) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Completed, Some(result), None)
    }

    pub fn set_error(&self, id: &TaskId, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Failed, None, Some(error.into()))
    }

    /// Complete the deferred half of a cancellation: called once the
    /// handler future has actually observed the `CancellationToken` and
    /// returned, not by `cancel()` itself.
    pub fn set_cancelled(&self, id: &TaskId) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Cancelled, None, None)
    }

    /// Request cancellation: fires the task's `CancellationToken` so any
    /// in-flight handler can observe it cooperatively. The task stays
    /// `working` until the handler actually returns and `set_cancelled` is
    /// called to complete the transition.
    pub fn cancel(&self, id: &TaskId) -> Result<(), TaskError> {
        let table = self.table.lock();
        let task = table.tasks.get(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal(id.to_string()));
        }
        task.cancellation.cancel();
        Ok(())
    }

    pub fn get_status(&self, id: &TaskId) -> Result<TaskStatus, TaskError> {
        let mut table = self.table.lock();
        Self::sweep_locked(&mut table);
        table
            .tasks
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    pub fn get_result(&self, id: &TaskId) -> Result<(Option<Value>, Option<String>), TaskError> {
        let table = self.table.lock();
        let task = table.tasks.get(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if !task.status.is_terminal() {
            return Err(TaskError::NotTerminal(id.to_string()));
        }
        Ok((task.result.clone(), task.error.clone()))
    }

    pub fn cancellation_token(&self, id: &TaskId) -> Option<CancellationToken> {
        self.table.lock().tasks.get(id).map(|t| t.cancellation.clone())
    }

    pub fn list_for_session(&self, session_id: &SessionId) -> Vec<TaskId> {
        self.table
            .lock()
            .tasks
            .values()
            .filter(|t| &t.session_id == session_id)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Drop every task belonging to an evicted session.
    pub fn purge_session(&self, session_id: &SessionId) {
        self.table.lock().tasks.retain(|_, t| &t.session_id != session_id);
    }

    pub fn in_flight_count(&self) -> usize {
        self.table.lock().tasks.values().filter(|t| !t.status.is_terminal()).count()
    }

    /// Every task not yet in a terminal state, across all sessions — used by
    /// graceful shutdown to force-cancel whatever didn't finish in time.
    pub fn in_flight_ids(&self) -> Vec<TaskId> {
        self.table
            .lock()
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::from("sess-test")
    }

    #[test]
    fn transitions_from_working_to_completed() {
        let mgr = TaskManager::new();
        let id = mgr.create(session(), "add");
        assert_eq!(mgr.get_status(&id).unwrap(), TaskStatus::Working);
        mgr.set_result(&id, serde_json::json!(5)).unwrap();
        assert_eq!(mgr.get_status(&id).unwrap(), TaskStatus::Completed);
    }

    #[test]
    fn terminal_state_is_final() {
        let mgr = TaskManager::new();
        let id = mgr.create(session(), "add");
        mgr.set_result(&id, serde_json::json!(5)).unwrap();
        let err = mgr.set_error(&id, "boom").unwrap_err();
        assert_eq!(err, TaskError::AlreadyTerminal(id.to_string()));
    }

    #[test]
    fn result_requires_terminal_state() {
        let mgr = TaskManager::new();
        let id = mgr.create(session(), "add");
        let err = mgr.get_result(&id).unwrap_err();
        assert_eq!(err, TaskError::NotTerminal(id.to_string()));
    }

    #[test]
    fn cancel_fires_token_but_stays_working_until_acknowledged() {
        let mgr = TaskManager::new();
        let id = mgr.create(session(), "add");
        let token = mgr.cancellation_token(&id).unwrap();
        mgr.cancel(&id).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(mgr.get_status(&id).unwrap(), TaskStatus::Working);
        mgr.set_cancelled(&id).unwrap();
        assert_eq!(mgr.get_status(&id).unwrap(), TaskStatus::Cancelled);
    }

    #[test]
    fn status_change_callback_fires_on_every_transition() {
        let mgr = TaskManager::new();
        let seen: Arc<Mutex<Vec<TaskStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        mgr.set_on_status_change(Arc::new(move |_session, _id, status| {
            seen_cb.lock().push(status);
        }));
        let id = mgr.create(session(), "add");
        mgr.cancel(&id).unwrap();
        assert!(seen.lock().is_empty());
        mgr.set_cancelled(&id).unwrap();
        assert_eq!(*seen.lock(), vec![TaskStatus::Cancelled]);
    }

    #[test]
    fn purge_session_drops_its_tasks() {
        let mgr = TaskManager::new();
        let id = mgr.create(session(), "add");
        mgr.purge_session(&session());
        assert_eq!(mgr.get_status(&id).unwrap_err(), TaskError::NotFound(id.to_string()));
    }

    #[test]
    fn in_flight_ids_excludes_terminal_tasks() {
        let mgr = TaskManager::new();
        let working = mgr.create(session(), "add");
        let done = mgr.create(session(), "sub");
        mgr.set_result(&done, serde_json::json!(1)).unwrap();
        assert_eq!(mgr.in_flight_ids(), vec![working]);
    }
}
