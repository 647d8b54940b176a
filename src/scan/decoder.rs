//! Scan decoder: runs a frame source through a detector on a background
//! task and streams the results.
//!
//! DESIGN
//! ======
//! The source is moved into the task on `start` and handed back through the
//! task's `JoinHandle` on `stop`, so it is owned by exactly one place at a
//! time and can be restarted. The task opens the source, loops until
//! cancelled or exhausted, and always closes the source before returning;
//! that is the only place the camera is released.
//!
//! Both `start` and `stop` are idempotent. `stop` may be called before the
//! task has even been scheduled: cancellation is a watch flag checked ahead
//! of every await in the loop.
//!
//! "No code in frame" is swallowed. Detector failures and source errors are
//! surfaced as `DecodeEvent::Failed`; a source error also ends the run.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{CodeDetector, DetectError, Detection, FrameSource, Region, ScanError};

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum DecodeEvent {
    Detected { seq: u64, region: Region, detections: Vec<Detection> },
    Failed(ScanError),
}

/// Infinite stream of decode events. Ends only when the decoder is dropped.
pub struct DecodeStream {
    rx: mpsc::Receiver<DecodeEvent>,
}

impl DecodeStream {
    pub async fn recv(&mut self) -> Option<DecodeEvent> {
        self.rx.recv().await
    }
}

impl futures::Stream for DecodeStream {
    type Item = DecodeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct Running<S> {
    cancel: watch::Sender<bool>,
    task: JoinHandle<S>,
}

pub struct ScanDecoder<S, D> {
    source: Option<S>,
    detector: Arc<D>,
    tx: mpsc::Sender<DecodeEvent>,
    running: Option<Running<S>>,
}

impl<S: FrameSource, D: CodeDetector> ScanDecoder<S, D> {
    #[must_use]
    pub fn new(source: S, detector: D) -> (Self, DecodeStream) {
        Self::with_capacity(source, detector, DEFAULT_EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(source: S, detector: D, capacity: usize) -> (Self, DecodeStream) {
        let (tx, rx) = mpsc::channel(capacity);
        let decoder = Self { source: Some(source), detector: Arc::new(detector), tx, running: None };
        (decoder, DecodeStream { rx })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Start decoding. Returns false if already started or if the source
    /// was lost to a crashed run.
    pub fn start(&mut self) -> bool {
        if self.running.is_some() {
            return false;
        }
        let Some(source) = self.source.take() else {
            warn!("scan decoder has no frame source");
            return false;
        };
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(run(source, Arc::clone(&self.detector), self.tx.clone(), cancelled));
        self.running = Some(Running { cancel, task });
        info!("scan decoder started");
        true
    }

    /// Stop decoding and wait until the source is closed. No-op when not
    /// running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.cancel.send(true);
        match running.task.await {
            Ok(source) => {
                self.source = Some(source);
                info!("scan decoder stopped");
            }
            Err(e) => error!(error = %e, "scan decoder task failed; frame source lost"),
        }
    }
}

async fn run<S: FrameSource, D: CodeDetector>(
    mut source: S,
    detector: Arc<D>,
    tx: mpsc::Sender<DecodeEvent>,
    mut cancelled: watch::Receiver<bool>,
) -> S {
    let opened = tokio::select! {
        biased;
        _ = cancelled.changed() => None,
        result = source.open() => Some(result),
    };
    match opened {
        Some(Ok(())) => decode_loop(&mut source, detector.as_ref(), &tx, &mut cancelled).await,
        Some(Err(e)) => {
            warn!(error = %e, "frame source failed to open");
            let _ = tx.try_send(DecodeEvent::Failed(e));
        }
        None => debug!("scan decoder cancelled before source opened"),
    }
    source.close().await;
    source
}

async fn decode_loop<S: FrameSource, D: CodeDetector>(
    source: &mut S,
    detector: &D,
    tx: &mpsc::Sender<DecodeEvent>,
    cancelled: &mut watch::Receiver<bool>,
) {
    loop {
        if *cancelled.borrow() {
            return;
        }
        let next = tokio::select! {
            biased;
            _ = cancelled.changed() => return,
            next = source.next_frame() => next,
        };
        let event = match next {
            Ok(Some(frame)) => match detector.detect(&frame) {
                Ok(detections) if detections.is_empty() => continue,
                Ok(detections) => DecodeEvent::Detected { seq: frame.seq, region: frame.region(), detections },
                Err(DetectError::NotFound) => {
                    trace!(seq = frame.seq, "no code in frame");
                    continue;
                }
                Err(DetectError::Failed(reason)) => {
                    debug!(seq = frame.seq, %reason, "code located but not decoded");
                    DecodeEvent::Failed(ScanError::Decode(reason))
                }
            },
            Ok(None) => {
                info!("frame source exhausted");
                return;
            }
            Err(e) => {
                warn!(error = %e, "frame source error; stopping");
                let _ = tx.try_send(DecodeEvent::Failed(e));
                return;
            }
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => debug!("decode consumer lagging; frame dropped"),
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod tests;
