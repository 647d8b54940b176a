//! QR detection over a frame's greyscale pixels.
//!
//! Frames that carry no pixels (pre-located captures) fall back to their
//! annotations, so one detector serves both live and replayed input.

use rqrr::PreparedImage;
use tracing::debug;

use super::replay::AnnotationDetector;
use super::{CameraFrame, CodeDetector, DetectError, Detection, Point};

#[derive(Debug, Clone, Copy, Default)]
pub struct QrDetector;

impl CodeDetector for QrDetector {
    fn detect(&self, frame: &CameraFrame) -> Result<Vec<Detection>, DetectError> {
        if frame.luma.is_empty() {
            return AnnotationDetector.detect(frame);
        }

        let width = frame.width as usize;
        let height = frame.height as usize;
        if frame.luma.len() != width * height {
            return Err(DetectError::Failed(format!(
                "luma buffer holds {} bytes, expected {width}x{height}",
                frame.luma.len()
            )));
        }

        let mut image = PreparedImage::prepare_from_greyscale(width, height, |x, y| frame.luma[y * width + x]);
        let grids = image.detect_grids();
        if grids.is_empty() {
            return Err(DetectError::NotFound);
        }

        let located = grids.len();
        let detections: Vec<Detection> = grids
            .iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_, payload)) => Some(Detection { payload, corners: grid.bounds.each_ref().map(corner) }),
                Err(e) => {
                    debug!(seq = frame.seq, error = ?e, "qr grid located but not decoded");
                    None
                }
            })
            .collect();
        if detections.is_empty() {
            return Err(DetectError::Failed(format!("{located} code(s) located but unreadable")));
        }
        Ok(detections)
    }
}

fn corner(p: &rqrr::Point) -> Point {
    Point { x: f64::from(p.x), y: f64::from(p.y) }
}

#[cfg(test)]
#[path = "qr_test.rs"]
mod tests;
