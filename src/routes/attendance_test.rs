use super::*;
use crate::db::BackendError;
use crate::identity;
use crate::model::AttendanceStatus;
use crate::services::session;
use crate::state::test_helpers::test_app_state;
use crate::store::ScanState;

#[test]
fn store_error_to_status_maps_each_variant() {
    assert_eq!(store_error_to_status(&StoreError::UnknownAttendee(1)), StatusCode::NOT_FOUND);
    assert_eq!(store_error_to_status(&StoreError::AttendeeDeleted(1)), StatusCode::GONE);
    assert_eq!(store_error_to_status(&StoreError::NoOpenSession), StatusCode::CONFLICT);
    assert_eq!(
        store_error_to_status(&StoreError::Backend(BackendError::ChannelClosed)),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn counts_without_session_are_empty() {
    let (state, _backend) = test_app_state();
    let Json(response) = counts(State(state)).await;
    assert_eq!(response.session_id, None);
    assert_eq!(response.counts.total(), 0);
}

#[tokio::test]
async fn check_in_then_roster_reflects_it() {
    let (state, backend) = test_app_state();
    let john = backend.add_attendee("John", "Doe");
    attendance::load(&state).await.unwrap();
    session::open_session(&state, None).await.unwrap();

    let Json(record) = check_in(State(state.clone()), Path(john.id), Json(CheckInBody { status: None }))
        .await
        .unwrap();
    assert_eq!(record.status, CheckInStatus::Present);

    let Json(roster) = list_attendees(State(state.clone())).await;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].status, AttendanceStatus::Present);

    let Json(response) = counts(State(state)).await;
    assert_eq!(response.counts.present, 1);
}

#[tokio::test]
async fn check_in_without_session_conflicts() {
    let (state, backend) = test_app_state();
    let john = backend.add_attendee("John", "Doe");
    attendance::load(&state).await.unwrap();

    let result = check_in(State(state), Path(john.id), Json(CheckInBody { status: Some(CheckInStatus::Absent) })).await;
    assert_eq!(result.unwrap_err(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn scan_rejects_blank_payload_and_classifies_others() {
    let (state, backend) = test_app_state();
    let john = backend.add_attendee("John", "Doe");
    attendance::load(&state).await.unwrap();
    session::open_session(&state, None).await.unwrap();

    let blank = scan(State(state.clone()), Json(ScanBody { payload: "  ".into() })).await;
    assert_eq!(blank.unwrap_err(), StatusCode::BAD_REQUEST);

    let Json(outcome) = scan(State(state), Json(ScanBody { payload: identity::hash(&john) })).await.unwrap();
    assert_eq!(outcome.state, ScanState::Present);
}
