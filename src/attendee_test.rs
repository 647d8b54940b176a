use super::*;
use crate::state::test_helpers::{at, john, record};
use crate::model::CheckInStatus::{Absent, Present};

#[test]
fn no_records_is_not_scanned() {
    let state = AttendeeState::new(john());
    assert!(state.current_record().is_none());
    assert_eq!(state.current_status(), AttendanceStatus::NotScanned);
    assert_eq!(state.status_for(5), AttendanceStatus::NotScanned);
}

#[test]
fn duplicate_push_is_ignored() {
    let mut state = AttendeeState::new(john());
    let first = state.push_record(record(10, 1, 5, Present, at(0)));
    let second = state.push_record(record(10, 1, 5, Present, at(0)));

    assert!(first.updated);
    assert_eq!(first.status_changed, Some((AttendanceStatus::NotScanned, AttendanceStatus::Present)));
    assert!(!second.updated);
    assert_eq!(state.records().len(), 1);
}

#[test]
fn newer_record_wins() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(10, 1, 5, Present, at(0)));
    let change = state.push_record(record(11, 1, 5, Absent, at(1)));

    assert_eq!(state.status_for(5), AttendanceStatus::Absent);
    assert_eq!(state.current_record().map(|r| r.id), Some(11));
    assert_eq!(change.status_changed, Some((AttendanceStatus::Present, AttendanceStatus::Absent)));
}

#[test]
fn older_record_arriving_late_does_not_take_over() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(11, 1, 5, Absent, at(10)));
    let change = state.push_record(record(10, 1, 5, Present, at(0)));

    assert!(change.updated);
    assert!(change.status_changed.is_none());
    assert_eq!(state.current_record().map(|r| r.id), Some(11));
    assert_eq!(state.status_for(5), AttendanceStatus::Absent);
}

#[test]
fn same_classification_does_not_signal_status_change() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(10, 1, 5, Present, at(0)));
    let change = state.push_record(record(11, 1, 5, Present, at(5)));
    assert!(change.updated);
    assert!(change.status_changed.is_none());
}

#[test]
fn timestamp_ties_break_by_higher_id() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(21, 1, 5, Absent, at(3)));
    state.push_record(record(20, 1, 5, Present, at(3)));
    assert_eq!(state.status_for(5), AttendanceStatus::Absent);
    assert_eq!(state.current_record().map(|r| r.id), Some(21));
}

#[test]
fn status_for_filters_by_session() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(10, 1, 5, Present, at(0)));
    state.push_record(record(11, 1, 6, Absent, at(1)));

    assert_eq!(state.status_for(5), AttendanceStatus::Present);
    assert_eq!(state.status_for(6), AttendanceStatus::Absent);
    assert_eq!(state.status_for(7), AttendanceStatus::NotScanned);
}

#[test]
fn removing_current_record_recomputes() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(10, 1, 5, Present, at(0)));
    state.push_record(record(11, 1, 5, Absent, at(1)));

    let change = state.remove_record(11);
    assert!(change.updated);
    assert_eq!(change.status_changed, Some((AttendanceStatus::Absent, AttendanceStatus::Present)));
    assert_eq!(state.current_record().map(|r| r.id), Some(10));
}

#[test]
fn removing_last_record_clears_current() {
    let mut state = AttendeeState::new(john());
    state.push_record(record(10, 1, 5, Present, at(0)));
    state.remove_record(10);
    assert!(state.current_record().is_none());
    assert_eq!(state.current_status(), AttendanceStatus::NotScanned);
}

#[test]
fn removing_unknown_record_is_noop() {
    let mut state = AttendeeState::new(john());
    let change = state.remove_record(99);
    assert!(!change.updated);
}

#[test]
fn renaming_changes_payload() {
    let mut state = AttendeeState::new(john());
    let before = state.payload().to_owned();
    let mut renamed = john();
    renamed.surname = "Smith".into();
    assert!(state.set_attendee(renamed));
    assert_ne!(state.payload(), before);

    let mut deleted = state.attendee().clone();
    deleted.deleted = true;
    assert!(!state.set_attendee(deleted));
    assert!(state.is_deleted());
}
