//! SSE frame construction and replay. A frame is always stored in the
//! session's replay buffer before it's sent live, so a client that
//! reconnects with `Last-Event-ID` sees exactly what it missed.

use axum::response::sse::Event;
use bytes::Bytes;
use ferrite_mcp_core::SessionId;
use ferrite_mcp_server::SessionManager;
use serde_json::Value;
use tokio::sync::mpsc;

/// Serialize `payload`, append it to the session's SSE replay buffer, and
/// push it down `sender` as one named frame. Silently drops the frame if
/// the session has since been torn down or the channel's receiver is gone.
pub(crate) fn emit(
    sessions: &SessionManager,
    session_id: &SessionId,
    event_name: &'static str,
    payload: &Value,
    sender: &mpsc::UnboundedSender<Event>,
) {
    let bytes = Bytes::from(serde_json::to_vec(payload).unwrap_or_default());
    let event_id = sessions
        .with_session(session_id, |session| session.push_sse_event(bytes.clone()))
        .unwrap_or(0);
    let data = String::from_utf8_lossy(&bytes).into_owned();
    let _ = sender.send(Event::default().event(event_name).id(event_id.to_string()).data(data));
}

/// Every buffered frame newer than `last_event_id`, oldest first, ready to
/// prepend to a reconnecting GET `/mcp` stream. The buffer only remembers
/// raw payload bytes, not the original frame's event name, so replayed
/// frames are always reframed as `event: message` — a client distinguishes
/// a request from a notification from the payload's own `method`/`result`
/// shape, same as it would on the wire.
pub(crate) fn replay_events(sessions: &SessionManager, session_id: &SessionId, last_event_id: u64) -> Vec<Event> {
    sessions
        .with_session(session_id, |session| session.sse_buffer.replay_after(last_event_id))
        .unwrap_or_default()
        .into_iter()
        .map(|stored| {
            let data = String::from_utf8_lossy(&stored.payload).into_owned();
            Event::default().event("message").id(stored.event_id.to_string()).data(data)
        })
        .collect()
}
