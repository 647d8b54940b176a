use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::scan::replay::AnnotationDetector;
use crate::scan::{CameraFrame, Point};

#[derive(Default, Clone)]
struct Counters {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

struct CountingSource {
    rx: mpsc::Receiver<CameraFrame>,
    counters: Counters,
}

#[async_trait::async_trait]
impl FrameSource for CountingSource {
    async fn open(&mut self) -> Result<(), ScanError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<CameraFrame>, ScanError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingSource;

#[async_trait::async_trait]
impl FrameSource for FailingSource {
    async fn open(&mut self) -> Result<(), ScanError> {
        Err(ScanError::Io(std::io::Error::other("camera busy")))
    }

    async fn next_frame(&mut self) -> Result<Option<CameraFrame>, ScanError> {
        Err(ScanError::NotOpen)
    }

    async fn close(&mut self) {}
}

fn counting() -> (mpsc::Sender<CameraFrame>, CountingSource, Counters) {
    let (tx, rx) = mpsc::channel(8);
    let counters = Counters::default();
    (tx, CountingSource { rx, counters: counters.clone() }, counters)
}

fn frame_with(payloads: &[&str]) -> CameraFrame {
    let annotations = payloads
        .iter()
        .map(|p| Detection {
            payload: (*p).to_owned(),
            corners: [
                Point { x: 0.0, y: 0.0 },
                Point { x: 10.0, y: 0.0 },
                Point { x: 10.0, y: 10.0 },
                Point { x: 0.0, y: 10.0 },
            ],
        })
        .collect();
    CameraFrame { seq: 7, width: 100, height: 100, luma: Vec::new(), annotations }
}

async fn next_event(stream: &mut DecodeStream) -> DecodeEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("decode event")
        .expect("stream open")
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (_tx, source, counters) = counting();
    let (mut decoder, _stream) = ScanDecoder::new(source, AnnotationDetector);

    assert!(decoder.start());
    assert!(!decoder.start());
    decoder.stop().await;
    decoder.stop().await;

    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(!decoder.is_running());
}

#[tokio::test]
async fn stop_before_task_runs_still_releases_source() {
    let (_tx, source, counters) = counting();
    let (mut decoder, _stream) = ScanDecoder::new(source, AnnotationDetector);

    decoder.start();
    decoder.stop().await;

    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn detections_are_streamed_and_empty_frames_swallowed() {
    let (tx, source, _counters) = counting();
    let (mut decoder, mut stream) = ScanDecoder::new(source, AnnotationDetector);
    decoder.start();

    tx.send(frame_with(&[])).await.unwrap();
    tx.send(frame_with(&["123", "456"])).await.unwrap();

    let DecodeEvent::Detected { seq, region, detections } = next_event(&mut stream).await else {
        panic!("expected detections");
    };
    assert_eq!(seq, 7);
    assert!((region.width - 100.0).abs() < f64::EPSILON);
    assert_eq!(detections.iter().map(|d| d.payload.as_str()).collect::<Vec<_>>(), vec!["123", "456"]);

    decoder.stop().await;
}

#[tokio::test]
async fn unreadable_codes_surface_as_failures() {
    let (tx, source, _counters) = counting();
    let (mut decoder, mut stream) = ScanDecoder::new(source, AnnotationDetector);
    decoder.start();

    tx.send(frame_with(&[""])).await.unwrap();
    assert!(matches!(next_event(&mut stream).await, DecodeEvent::Failed(ScanError::Decode(_))));

    decoder.stop().await;
}

#[tokio::test]
async fn decoder_restarts_with_same_source() {
    let (tx, source, counters) = counting();
    let (mut decoder, mut stream) = ScanDecoder::new(source, AnnotationDetector);

    decoder.start();
    tx.send(frame_with(&["a"])).await.unwrap();
    next_event(&mut stream).await;
    decoder.stop().await;

    assert!(decoder.start());
    tx.send(frame_with(&["b"])).await.unwrap();
    let DecodeEvent::Detected { detections, .. } = next_event(&mut stream).await else {
        panic!("expected detections after restart");
    };
    assert_eq!(detections[0].payload, "b");
    decoder.stop().await;

    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn open_failure_is_reported() {
    let (mut decoder, mut stream) = ScanDecoder::new(FailingSource, AnnotationDetector);
    decoder.start();
    assert!(matches!(next_event(&mut stream).await, DecodeEvent::Failed(ScanError::Io(_))));
    decoder.stop().await;
    assert!(decoder.start());
    decoder.stop().await;
}
