//! Notification listener loop shared by channel-backed backends.
//!
//! DESIGN
//! ======
//! `NotificationSource` is the transport seam: it yields raw payloads and
//! can re-establish its connection. `run` turns that into a feed:
//! - `Connected` once up front
//! - parsed payloads while the connection holds
//! - `Disconnected` on a drop or error, then reconnect attempts with
//!   backoff (1s doubling to 10s) until one succeeds, then `Connected`
//!
//! `Connected` after a reconnect does not wait for traffic, so a quiet
//! channel still gets its heartbeat and backfill.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{BackendError, RealtimeMessage, forward, parse_notification};

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 10_000;

#[async_trait::async_trait]
pub(crate) trait NotificationSource: Send {
    /// Next raw payload. `Ok(None)` means the connection dropped.
    async fn next_payload(&mut self) -> Result<Option<String>, BackendError>;

    /// Re-establish the connection and resume listening.
    async fn reconnect(&mut self) -> Result<(), BackendError>;
}

pub(crate) async fn run(mut source: impl NotificationSource, tx: mpsc::Sender<RealtimeMessage>) {
    if !forward(&tx, RealtimeMessage::Connected) {
        return;
    }

    loop {
        match source.next_payload().await {
            Ok(Some(payload)) => match parse_notification(&payload) {
                Ok(Some(msg)) => {
                    if !forward(&tx, msg) {
                        return;
                    }
                }
                Ok(None) => debug!("ignoring change on untracked table"),
                Err(e) => warn!(error = %e, "skipping unparsable realtime payload"),
            },
            Ok(None) => {
                warn!("realtime connection lost; reconnecting");
                if !resume(&mut source, &tx).await {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "realtime listener error; reconnecting");
                if !resume(&mut source, &tx).await {
                    return;
                }
            }
        }
    }
}

/// Report the drop, reconnect with backoff, and report the recovery.
/// Returns `false` once the consumer is gone.
async fn resume(source: &mut impl NotificationSource, tx: &mpsc::Sender<RealtimeMessage>) -> bool {
    if !forward(tx, RealtimeMessage::Disconnected) {
        return false;
    }

    let mut backoff_ms = INITIAL_BACKOFF_MS;
    loop {
        if tx.is_closed() {
            return false;
        }
        match source.reconnect().await {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, backoff_ms, "realtime reconnect failed; backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }

    info!("realtime connection restored");
    forward(tx, RealtimeMessage::Connected)
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod tests;
