//! Realtime service: keeps the engine subscribed to backend changes.
//!
//! DESIGN
//! ======
//! A single background task subscribes to the backend feed and routes every
//! message through the connectivity monitor before applying it:
//! - `Connected`: mark connected (stale), send a debounced heartbeat, and
//!   backfill with an idempotent reload.
//! - `Heartbeat` / `Change`: mark live; changes go to the store or the
//!   session registry.
//! - `Disconnected`: mark disconnected and keep reading; the backend may
//!   reconnect underneath the same feed.
//!
//! While waiting for the next message the task also sleeps until the
//! monitor's liveness deadline, so a quiet channel is checked with a
//! heartbeat instead of silently going stale.
//!
//! When the feed ends the task resubscribes with jittered exponential
//! backoff.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::db::{ChangeKind, RealtimeFeed, RealtimeMessage, RowChange};
use crate::services::{attendance, session};
use crate::state::AppState;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(10);
const BACKOFF_JITTER_MS: u64 = 250;

/// Spawn the realtime task. Returns a handle for shutdown.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

/// Subscribe, pump, and resubscribe forever.
pub async fn run(state: AppState) {
    let mut attempt: u32 = 0;
    loop {
        match state.backend.subscribe().await {
            Ok(feed) => {
                attempt = 0;
                pump(&state, feed).await;
                info!("realtime feed ended");
            }
            Err(e) => warn!(error = %e, attempt, "realtime subscribe failed"),
        }
        state.connectivity().on_disconnected();

        let delay = backoff(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis(), "realtime resubscribe scheduled");
        tokio::time::sleep(delay).await;
    }
}

/// Exponential delay for the given attempt, capped, plus random jitter.
pub(crate) fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt.min(8)));
    exp.min(BACKOFF_MAX) + Duration::from_millis(rand::random_range(0..=BACKOFF_JITTER_MS))
}

async fn pump(state: &AppState, mut feed: RealtimeFeed) {
    loop {
        let deadline = state.connectivity().deadline();
        let next = tokio::select! {
            msg = feed.recv() => msg,
            () = sleep_until(deadline) => {
                let beat = state.connectivity().poll_at(Instant::now());
                if beat {
                    heartbeat(state).await;
                }
                continue;
            }
        };
        let Some(msg) = next else {
            return;
        };
        handle(state, msg).await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Route one feed message.
pub async fn handle(state: &AppState, msg: RealtimeMessage) {
    let now = Instant::now();
    match msg {
        RealtimeMessage::Connected => {
            let beat = {
                let mut monitor = state.connectivity();
                monitor.on_connected_at(now);
                monitor.request_heartbeat_at(now)
            };
            if beat {
                heartbeat(state).await;
            }
            if let Err(e) = attendance::load(state).await {
                warn!(error = %e, "realtime backfill failed");
            }
        }
        RealtimeMessage::Disconnected => {
            state.connectivity().on_disconnected();
        }
        RealtimeMessage::Heartbeat => {
            state.connectivity().on_update_at(now);
        }
        RealtimeMessage::Change(change) => {
            state.connectivity().on_update_at(now);
            apply_change(state, change).await;
        }
    }
}

/// Apply one row change to the component that owns the table.
pub async fn apply_change(state: &AppState, change: RowChange) {
    match change {
        RowChange::Session(ChangeKind::Delete, row) => session::remove_session(state, row.id).await,
        RowChange::Session(_, row) => session::apply_session(state, row).await,
        change => {
            state.store.write().await.ingest_realtime(change);
        }
    }
}

async fn heartbeat(state: &AppState) {
    match state.backend.send_heartbeat().await {
        Ok(()) => debug!("realtime heartbeat sent"),
        Err(e) => warn!(error = %e, "realtime heartbeat failed"),
    }
}

#[cfg(test)]
#[path = "realtime_test.rs"]
mod tests;
