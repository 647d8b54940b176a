//! Scanner pipeline: decoder -> overlay, and in parallel -> check-in.
//!
//! DESIGN
//! ======
//! `Scanner` owns a `ScanDecoder` and one pump task reading its decode
//! stream. Every detected code is folded into the overlay with the store's
//! current classification (`classify_at`). A code with no recent verdict
//! shows `UNKNOWN` and goes through `attendance::begin_scan`. When a
//! check-in must be written the overlay shows `PROCESSING` and the write
//! runs on its own task, which reclassifies the overlay entry with the
//! final outcome. A failed write reads as `ERROR` for the dedup window, so
//! the scanner does not retry it on every frame. The pump never waits on a backend
//! write, so the overlay keeps tracking codes while writes are in flight.
//!
//! The pump lives as long as the `Scanner`; `start`/`stop` only control the
//! decoder. `stop` also disposes the overlay so no stale boxes linger.

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scan::decoder::{DecodeEvent, DecodeStream, ScanDecoder};
use crate::scan::{CodeDetector, Detection, FrameSource, Region, ScanError};
use crate::services::attendance;
use crate::state::AppState;
use crate::store::{ScanDecision, ScanState};

pub struct Scanner<S, D> {
    state: AppState,
    decoder: ScanDecoder<S, D>,
    pump: JoinHandle<()>,
}

impl<S: FrameSource, D: CodeDetector> Scanner<S, D> {
    /// Build the pipeline and spawn its pump. Must be called from within a
    /// Tokio runtime. The decoder is not started.
    pub fn new(state: AppState, source: S, detector: D) -> Self {
        let (decoder, stream) = ScanDecoder::new(source, detector);
        let pump = tokio::spawn(pump(state.clone(), stream));
        Self { state, decoder, pump }
    }

    /// Start decoding frames. Returns false if already running.
    pub fn start(&mut self) -> bool {
        self.decoder.start()
    }

    /// Stop decoding, release the frame source, and clear the overlay.
    pub async fn stop(&mut self) {
        self.decoder.stop().await;
        self.state.overlay.dispose();
        info!("scanner stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.decoder.is_running()
    }
}

impl<S, D> Drop for Scanner<S, D> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(state: AppState, mut stream: DecodeStream) {
    while let Some(event) = stream.recv().await {
        match event {
            DecodeEvent::Detected { seq, region, detections } => {
                debug!(seq, codes = detections.len(), "codes detected");
                for detection in detections {
                    observe(&state, detection, region).await;
                }
            }
            DecodeEvent::Failed(ScanError::Decode(reason)) => debug!(%reason, "code not decoded"),
            DecodeEvent::Failed(e) => warn!(error = %e, "scan decoder failed"),
        }
    }
}

/// Place the detection on the overlay with its current classification. Only
/// payloads the store has no recent verdict for go on to `begin_scan`.
async fn observe(state: &AppState, detection: Detection, region: Region) {
    let shown = state.store.read().await.classify_at(&detection.payload, Instant::now());
    state.overlay.observe(&detection, region, shown);
    if shown != ScanState::Unknown {
        return;
    }

    match attendance::begin_scan(state, &detection.payload).await {
        ScanDecision::Resolved(outcome) => {
            state.overlay.reclassify(&detection.payload, outcome.state);
        }
        ScanDecision::Write(new) => {
            state.overlay.reclassify(&detection.payload, ScanState::Processing);
            let state = state.clone();
            tokio::spawn(async move {
                let payload = detection.payload;
                let outcome = attendance::complete_scan(&state, &payload, new).await;
                state.overlay.reclassify(&payload, outcome.state);
            });
        }
    }
}

#[cfg(test)]
#[path = "scanner_test.rs"]
mod tests;
