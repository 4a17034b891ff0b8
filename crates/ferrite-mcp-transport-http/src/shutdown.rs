//! Graceful shutdown: stop admitting new work, give in-flight tool calls a
//! chance to finish, then force everything else closed.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Wait for `Ctrl-C` (or the platform's equivalent `SIGTERM`), then drain.
/// Handed to `axum::serve(...).with_graceful_shutdown(...)`.
pub async fn wait_for_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to install shutdown signal handler, draining anyway");
    }
    drain(&state).await;
}

/// Stop accepting new dispatches, wait up to the configured shutdown
/// timeout for whatever's in flight to finish on its own, then force-cancel
/// the rest and tear down session state.
pub async fn drain(state: &AppState) {
    info!("draining: no longer accepting new dispatches");
    state.dispatcher().begin_drain();

    let deadline = Instant::now() + state.config().shutdown_timeout;
    while state.tasks().in_flight_count() > 0 && Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let survivors = state.tasks().in_flight_ids();
    if !survivors.is_empty() {
        warn!(count = survivors.len(), "cancelling tasks that outlived the shutdown timeout");
        for id in &survivors {
            // Fires the task's own CancellationToken, which is what a
            // long-running handler actually observes; the request-id-keyed
            // `Dispatcher::cancel` path is for client-initiated
            // `tasks/cancel` calls and has no bearing here.
            let _ = state.tasks().cancel(id);
        }
    }

    state.sessions().clear();
    info!("drain complete");
}
