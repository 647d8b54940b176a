use super::test_helpers::{john, test_app_state};
use super::*;
use crate::db::memory::MemoryBackend;

#[test]
fn operator_id_falls_back_to_backend_user() {
    let (state, _backend) = test_app_state();
    assert_eq!(state.operator_id().as_deref(), Some("tester"));

    let config = Config { operator_id: Some("front-desk".into()), ..Config::default() };
    let state = AppState::new(config, Arc::new(MemoryBackend::new(Some("tester".into()))));
    assert_eq!(state.operator_id().as_deref(), Some("front-desk"));

    let state = AppState::new(Config::default(), Arc::new(MemoryBackend::default()));
    assert_eq!(state.operator_id(), None);
}

#[tokio::test]
async fn store_events_are_broadcast_as_frames() {
    let (state, _backend) = test_app_state();
    let mut frames = state.subscribe_frames();

    state.store.write().await.ingest_load(vec![john()], Vec::new());

    let frame = frames.try_recv().expect("frame for added attendee");
    assert_eq!(frame.syscall, "attendance:attendee_added");
}

#[tokio::test]
async fn clones_share_components() {
    let (state, _backend) = test_app_state();
    let other = state.clone();

    other.store.write().await.ingest_load(vec![john()], Vec::new());
    assert!(state.store.read().await.attendee(1).is_some());
    assert!(Arc::ptr_eq(&state.sessions, &other.sessions));
}
