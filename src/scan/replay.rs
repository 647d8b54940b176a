//! Frame sources that need no camera, plus the detector that reads codes
//! pre-located in a frame's annotations.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{CameraFrame, CodeDetector, DetectError, Detection, FrameSource, ScanError};

// =============================================================================
// REPLAY
// =============================================================================

/// Replays a JSONL capture (one `CameraFrame` per line) at a fixed
/// interval, looping forever. Sequence numbers keep increasing across
/// loops.
pub struct ReplaySource {
    path: Option<PathBuf>,
    interval: Duration,
    frames: Vec<CameraFrame>,
    ticker: Option<Interval>,
    cursor: usize,
    seq: u64,
}

impl ReplaySource {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { path: Some(path.into()), interval, frames: Vec::new(), ticker: None, cursor: 0, seq: 0 }
    }

    #[must_use]
    pub fn from_frames(frames: Vec<CameraFrame>, interval: Duration) -> Self {
        Self { path: None, interval, frames, ticker: None, cursor: 0, seq: 0 }
    }

    /// Parse a JSONL capture. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` with the 1-based line number of the first bad
    /// line.
    pub fn parse(contents: &str) -> Result<Vec<CameraFrame>, ScanError> {
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| serde_json::from_str(line).map_err(|source| ScanError::InvalidFrame { line: i + 1, source }))
            .collect()
    }
}

#[async_trait::async_trait]
impl FrameSource for ReplaySource {
    async fn open(&mut self) -> Result<(), ScanError> {
        if let Some(path) = &self.path {
            let contents = tokio::fs::read_to_string(path).await?;
            self.frames = Self::parse(&contents)?;
            info!(path = %path.display(), frames = self.frames.len(), "replay capture loaded");
        }
        if self.frames.is_empty() {
            return Err(ScanError::EmptySource);
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.cursor = 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<CameraFrame>, ScanError> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Err(ScanError::NotOpen);
        };
        ticker.tick().await;
        let mut frame = self.frames[self.cursor % self.frames.len()].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        self.seq += 1;
        frame.seq = self.seq;
        Ok(Some(frame))
    }

    async fn close(&mut self) {
        self.ticker = None;
        debug!("replay source closed");
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

/// Frames pushed by another task. Exhausted when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<CameraFrame>,
}

impl ChannelSource {
    #[must_use]
    pub fn new(capacity: usize) -> (mpsc::Sender<CameraFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait::async_trait]
impl FrameSource for ChannelSource {
    async fn open(&mut self) -> Result<(), ScanError> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<CameraFrame>, ScanError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {}
}

// =============================================================================
// DETECTOR
// =============================================================================

/// Reads the codes carried in `CameraFrame::annotations`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationDetector;

impl CodeDetector for AnnotationDetector {
    fn detect(&self, frame: &CameraFrame) -> Result<Vec<Detection>, DetectError> {
        if frame.annotations.is_empty() {
            return Err(DetectError::NotFound);
        }
        let (readable, unreadable): (Vec<_>, Vec<_>) =
            frame.annotations.iter().cloned().partition(|d| !d.payload.is_empty());
        if readable.is_empty() && !unreadable.is_empty() {
            return Err(DetectError::Failed(format!("{} code(s) located but unreadable", unreadable.len())));
        }
        Ok(readable)
    }
}

#[cfg(test)]
#[path = "replay_test.rs"]
mod tests;
