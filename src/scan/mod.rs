//! Camera-side scanning: frame sources, code detection, and the live
//! overlay.
//!
//! ARCHITECTURE
//! ============
//! `FrameSource` produces `CameraFrame`s (a physical camera, a replay file,
//! or a channel fed by another task). `CodeDetector` turns a frame into
//! zero or more `Detection`s, each a payload plus its four corner points;
//! `qr::QrDetector` decodes the frame's pixels.
//! `decoder::ScanDecoder` runs the two in a cancellable task and streams
//! `DecodeEvent`s; `overlay::Overlay` turns detections into positioned,
//! classified entries that expire when no longer seen.

pub mod decoder;
pub mod overlay;
pub mod qr;
pub mod replay;

use serde::{Deserialize, Serialize};

use crate::frame::ErrorCode;

// =============================================================================
// GEOMETRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Size of the active scan region, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub width: f64,
    pub height: f64,
}

/// One code located in a frame. Corners are in frame pixels, in the order
/// the detector reports them (top-left first, clockwise).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub payload: String,
    pub corners: [Point; 4],
}

// =============================================================================
// FRAMES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraFrame {
    #[serde(default)]
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    /// Greyscale pixels, row-major. Empty for pre-located captures.
    #[serde(default)]
    pub luma: Vec<u8>,
    /// Codes already located upstream (replay captures, hardware decoders).
    #[serde(default)]
    pub annotations: Vec<Detection>,
}

impl CameraFrame {
    #[must_use]
    pub fn region(&self) -> Region {
        Region { width: f64::from(self.width), height: f64::from(self.height) }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("frame source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid frame on line {line}: {source}")]
    InvalidFrame {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame source has no frames")]
    EmptySource,
    #[error("frame source is not open")]
    NotOpen,
    #[error("decode failed: {0}")]
    Decode(String),
}

impl ErrorCode for ScanError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_SCAN_IO",
            Self::InvalidFrame { .. } => "E_SCAN_INVALID_FRAME",
            Self::EmptySource => "E_SCAN_EMPTY_SOURCE",
            Self::NotOpen => "E_SCAN_NOT_OPEN",
            Self::Decode(_) => "E_SCAN_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Outcome of running a detector over one frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectError {
    /// No code in the frame. The normal case for most frames.
    #[error("no code found")]
    NotFound,
    #[error("{0}")]
    Failed(String),
}

// =============================================================================
// TRAITS
// =============================================================================

/// A camera or camera stand-in. `close` must be safe to call whether or not
/// `open` completed.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    async fn open(&mut self) -> Result<(), ScanError>;

    /// Next frame; `Ok(None)` when the source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<CameraFrame>, ScanError>;

    async fn close(&mut self);
}

pub trait CodeDetector: Send + Sync + 'static {
    /// Locate codes in a frame.
    ///
    /// # Errors
    ///
    /// `DetectError::NotFound` when the frame holds no code; `Failed` for a
    /// code that was located but could not be decoded.
    fn detect(&self, frame: &CameraFrame) -> Result<Vec<Detection>, DetectError>;
}
