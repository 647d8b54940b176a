use super::*;
use crate::db::BackendError;
use crate::state::test_helpers::test_app_state;

#[test]
fn session_error_to_status_maps_conflicts() {
    assert_eq!(session_error_to_status(&SessionError::AlreadyOpen(1)), StatusCode::CONFLICT);
    assert_eq!(session_error_to_status(&SessionError::AlreadyClosed(1)), StatusCode::CONFLICT);
    assert_eq!(session_error_to_status(&SessionError::NotFound(1)), StatusCode::NOT_FOUND);
    assert_eq!(
        session_error_to_status(&SessionError::Backend(BackendError::Rejected("dup".into()))),
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn open_close_cycle() {
    let (state, _backend) = test_app_state();

    let (status, Json(opened)) = open_session(
        State(state.clone()),
        Json(OpenSessionBody { description: Some("  ".into()) }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(opened.description, None);

    let again = open_session(State(state.clone()), Json(OpenSessionBody::default())).await;
    assert_eq!(again.unwrap_err(), StatusCode::CONFLICT);

    let Json(closed) = close_session(State(state.clone()), Path(opened.id)).await.unwrap();
    assert!(closed.closed_at.is_some());
    assert_eq!(close_session(State(state.clone()), Path(opened.id)).await.unwrap_err(), StatusCode::CONFLICT);
    assert_eq!(close_session(State(state.clone()), Path(404)).await.unwrap_err(), StatusCode::NOT_FOUND);

    let Json(history) = list_sessions(State(state)).await;
    assert_eq!(history.len(), 1);
}
