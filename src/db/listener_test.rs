use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;

const HEARTBEAT: &str = r#"{"type":"HEARTBEAT"}"#;

/// Source that plays back canned results, then goes quiet.
struct Scripted {
    payloads: VecDeque<Result<Option<String>, BackendError>>,
    reconnects: VecDeque<Result<(), BackendError>>,
    reconnect_calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(
        payloads: Vec<Result<Option<String>, BackendError>>,
        reconnects: Vec<Result<(), BackendError>>,
    ) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Self { payloads: payloads.into(), reconnects: reconnects.into(), reconnect_calls: calls.clone() };
        (source, calls)
    }
}

#[async_trait::async_trait]
impl NotificationSource for Scripted {
    async fn next_payload(&mut self) -> Result<Option<String>, BackendError> {
        match self.payloads.pop_front() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn reconnect(&mut self) -> Result<(), BackendError> {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.reconnects.pop_front().unwrap_or(Ok(()))
    }
}

async fn next(rx: &mut mpsc::Receiver<RealtimeMessage>) -> RealtimeMessage {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for feed message")
        .expect("feed closed")
}

#[tokio::test(start_paused = true)]
async fn quiet_channel_reports_connected_after_reconnect() {
    let (source, calls) = Scripted::new(vec![Ok(None)], vec![Err(BackendError::ChannelClosed), Ok(())]);
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(run(source, tx));

    assert_eq!(next(&mut rx).await, RealtimeMessage::Connected);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Disconnected);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Connected);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn listener_error_also_reconnects() {
    let (source, calls) = Scripted::new(vec![Err(BackendError::ChannelClosed)], Vec::new());
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(run(source, tx));

    assert_eq!(next(&mut rx).await, RealtimeMessage::Connected);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Disconnected);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Connected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn payloads_are_parsed_and_garbage_skipped() {
    let payloads = vec![Ok(Some(HEARTBEAT.to_owned())), Ok(Some("{nope".to_owned())), Ok(Some(HEARTBEAT.to_owned()))];
    let (source, calls) = Scripted::new(payloads, Vec::new());
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(run(source, tx));

    assert_eq!(next(&mut rx).await, RealtimeMessage::Connected);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Heartbeat);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Heartbeat);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_consumer_stops_reconnect_attempts() {
    let failures = (0..100).map(|_| Err(BackendError::ChannelClosed)).collect();
    let (source, calls) = Scripted::new(vec![Ok(None)], failures);
    let (tx, mut rx) = mpsc::channel(16);
    let task = tokio::spawn(run(source, tx));

    assert_eq!(next(&mut rx).await, RealtimeMessage::Connected);
    assert_eq!(next(&mut rx).await, RealtimeMessage::Disconnected);
    drop(rx);

    tokio::time::timeout(Duration::from_secs(120), task).await.expect("listener kept retrying").unwrap();
    assert!(calls.load(Ordering::SeqCst) < 100);
}
