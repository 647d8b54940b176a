use std::sync::{Arc, Mutex};

use super::*;
use crate::identity;
use crate::model::CheckInStatus::{Absent, Present};
use crate::state::test_helpers::{at, attendee, john, record};

const SESSION: i64 = 5;

fn loaded() -> AttendanceStore {
    let mut store = AttendanceStore::default();
    store.ingest_load(vec![john()], Vec::new());
    store.set_session(Some(SESSION));
    store
}

fn capture(store: &AttendanceStore) -> Arc<Mutex<Vec<StoreEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.events().subscribe(move |e| sink.lock().unwrap().push(e.clone()));
    seen
}

fn payload() -> String {
    identity::hash(&john())
}

// =============================================================================
// INGESTION
// =============================================================================

#[test]
fn same_record_through_every_channel_is_ingested_once() {
    let mut store = loaded();
    let r = record(10, 1, SESSION, Present, at(0));

    assert!(store.ingest_local_write(r.clone()));
    assert!(!store.ingest_realtime(RowChange::Record(ChangeKind::Insert, r.clone())));
    assert_eq!(store.ingest_load(vec![john()], vec![r.clone()]), 0);
    assert!(!store.ingest_local_write(r));

    assert_eq!(store.attendee(1).unwrap().records().len(), 1);
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::Present));
}

#[test]
fn latest_record_wins_whatever_the_arrival_order() {
    let newer = record(11, 1, SESSION, Present, at(10));
    let older = record(12, 1, SESSION, Absent, at(5));

    for order in [[newer.clone(), older.clone()], [older, newer]] {
        let mut store = loaded();
        for r in order {
            store.ingest_realtime(RowChange::Record(ChangeKind::Insert, r));
        }
        assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::Present));
    }
}

#[test]
fn timestamp_tie_goes_to_higher_id() {
    let mut store = loaded();
    store.ingest_realtime(RowChange::Record(ChangeKind::Insert, record(21, 1, SESSION, Absent, at(0))));
    store.ingest_realtime(RowChange::Record(ChangeKind::Insert, record(20, 1, SESSION, Present, at(0))));
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::Absent));
}

#[test]
fn records_of_other_sessions_do_not_count() {
    let mut store = loaded();
    store.ingest_local_write(record(10, 1, 4, Present, at(0)));
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::NotScanned));
    assert_eq!(store.count_by_status(SESSION).not_scanned, 1);
    assert_eq!(store.count_by_status(4).present, 1);
}

#[test]
fn realtime_update_replaces_record() {
    let mut store = loaded();
    store.ingest_local_write(record(10, 1, SESSION, Present, at(0)));

    assert!(store.ingest_realtime(RowChange::Record(ChangeKind::Update, record(10, 1, SESSION, Absent, at(0)))));
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::Absent));
    assert_eq!(store.attendee(1).unwrap().records().len(), 1);
}

#[test]
fn realtime_delete_falls_back_to_previous_record() {
    let mut store = loaded();
    store.ingest_local_write(record(10, 1, SESSION, Absent, at(0)));
    store.ingest_local_write(record(11, 1, SESSION, Present, at(5)));

    assert!(store.ingest_realtime(RowChange::Record(ChangeKind::Delete, record(11, 1, SESSION, Present, at(5)))));
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::Absent));
    assert!(!store.has_record(11));
}

#[test]
fn changes_for_unknown_rows_are_ignored() {
    let mut store = loaded();
    assert!(!store.ingest_realtime(RowChange::Record(ChangeKind::Update, record(99, 1, SESSION, Present, at(0)))));
    assert!(!store.ingest_realtime(RowChange::Record(ChangeKind::Delete, record(99, 1, SESSION, Present, at(0)))));
    assert!(!store.ingest_realtime(RowChange::Attendee(ChangeKind::Update, attendee(42, "Ghost", "Row"))));
    assert!(!store.ingest_realtime(RowChange::Attendee(ChangeKind::Delete, attendee(42, "Ghost", "Row"))));
    assert!(store.attendee(42).is_none());
}

#[test]
fn record_arriving_before_its_attendee_is_adopted() {
    let mut store = loaded();
    assert!(store.ingest_realtime(RowChange::Record(ChangeKind::Insert, record(30, 2, SESSION, Present, at(0)))));
    assert_eq!(store.orphan_count(), 1);
    assert!(store.has_record(30));

    store.ingest_realtime(RowChange::Attendee(ChangeKind::Insert, attendee(2, "Jane", "Roe")));
    assert_eq!(store.orphan_count(), 0);
    assert_eq!(store.status_for(2, SESSION), Some(AttendanceStatus::Present));
    assert_eq!(store.count_by_status(SESSION).present, 1);
}

#[test]
fn load_publishes_counts_once() {
    let mut store = AttendanceStore::default();
    store.set_session(Some(SESSION));
    let seen = capture(&store);

    store.ingest_load(
        vec![john(), attendee(2, "Jane", "Roe")],
        vec![record(10, 1, SESSION, Present, at(0)), record(11, 2, SESSION, Absent, at(0))],
    );

    let counts: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            StoreEvent::CountsChanged { counts, .. } => Some(*counts),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![StatusCounts { present: 1, absent: 1, not_scanned: 0 }]);
}

#[test]
fn local_write_emits_record_status_and_counts_in_order() {
    let mut store = loaded();
    let seen = capture(&store);
    let r = record(10, 1, SESSION, Present, at(0));

    store.ingest_local_write(r.clone());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            StoreEvent::RecordIngested(r),
            StoreEvent::StatusChanged {
                attendee_id: 1,
                from: AttendanceStatus::NotScanned,
                to: AttendanceStatus::Present,
            },
            StoreEvent::CountsChanged {
                session_id: SESSION,
                counts: StatusCounts { present: 1, absent: 0, not_scanned: 0 },
            },
        ]
    );
}

// =============================================================================
// ATTENDEES
// =============================================================================

#[test]
fn soft_deleted_attendee_leaves_active_views_but_keeps_history() {
    let mut store = loaded();
    store.ingest_local_write(record(10, 1, SESSION, Present, at(0)));
    let seen = capture(&store);

    let mut gone = john();
    gone.deleted = true;
    assert!(store.ingest_realtime(RowChange::Attendee(ChangeKind::Update, gone.clone())));

    assert!(store.resolve(&payload()).is_none());
    assert!(store.active_attendees().is_empty());
    assert_eq!(store.count_by_status(SESSION).total(), 0);
    assert_eq!(store.attendee(1).unwrap().records().len(), 1);
    assert_eq!(seen.lock().unwrap()[0], StoreEvent::AttendeeRemoved(gone));
}

#[test]
fn hard_delete_forgets_attendee_and_records() {
    let mut store = loaded();
    store.ingest_local_write(record(10, 1, SESSION, Present, at(0)));

    assert!(store.ingest_realtime(RowChange::Attendee(ChangeKind::Delete, john())));
    assert!(store.attendee(1).is_none());
    assert!(!store.has_record(10));
    assert_eq!(store.count_by_status(SESSION).total(), 0);
}

#[test]
fn rename_moves_payload() {
    let mut store = loaded();
    let old = payload();
    let renamed = attendee(1, "Johnny", "Doe");

    store.ingest_realtime(RowChange::Attendee(ChangeKind::Update, renamed.clone()));

    assert!(store.resolve(&old).is_none());
    assert_eq!(store.resolve(&identity::hash(&renamed)).map(AttendeeState::id), Some(1));
}

#[test]
fn active_attendees_sorted_by_surname_then_name() {
    let mut store = AttendanceStore::default();
    store.ingest_load(
        vec![attendee(3, "Zoe", "Adams"), attendee(1, "Amy", "Brown"), attendee(2, "Adam", "Adams")],
        Vec::new(),
    );
    let ids: Vec<i64> = store.active_attendees().iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

#[test]
fn colliding_payload_resolves_to_first_registered() {
    // "Ann" + "Lee1" + 1 and "Ann" + "Lee" + 11 hash the same string.
    let first = attendee(11, "Ann", "Lee");
    let second = attendee(1, "Ann", "Lee1");
    assert_eq!(identity::hash(&first), identity::hash(&second));

    let mut store = AttendanceStore::default();
    store.ingest_load(vec![first.clone(), second.clone()], Vec::new());
    let shared = identity::hash(&first);
    assert_eq!(store.resolve(&shared).map(AttendeeState::id), Some(11));

    let mut deleted = first;
    deleted.deleted = true;
    store.ingest_realtime(RowChange::Attendee(ChangeKind::Update, deleted));
    assert_eq!(store.resolve(&shared).map(AttendeeState::id), Some(1));
}

// =============================================================================
// SCANNING
// =============================================================================

#[test]
fn scan_writes_once_then_reports_present() {
    let mut store = loaded();
    let t0 = Instant::now();
    let p = payload();

    let ScanDecision::Write(new) = store.begin_scan_at(&p, Some(SESSION), Some("op".into()), t0) else {
        panic!("expected a write");
    };
    assert_eq!(
        new,
        NewCheckIn {
            attendee_id: 1,
            session_id: SESSION,
            status: CheckInStatus::Present,
            created_method: CreatedMethod::Scan,
            created_by: Some("op".into()),
        }
    );
    assert_eq!(store.classify_at(&p, t0), ScanState::Processing);
    assert!(matches!(
        store.begin_scan_at(&p, Some(SESSION), None, t0),
        ScanDecision::Resolved(ScanOutcome { state: ScanState::Processing, .. })
    ));

    let outcome = store.finish_scan_at(&p, Some(record(10, 1, SESSION, Present, at(0))), t0);
    assert_eq!(outcome, ScanOutcome { state: ScanState::Present, attendee: Some(john()) });
    assert_eq!(store.classify_at(&p, t0 + Duration::from_millis(100)), ScanState::Present);
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::Present));
}

#[test]
fn present_attendee_is_not_written_again_after_window() {
    let mut store = loaded();
    store.ingest_local_write(record(10, 1, SESSION, Present, at(0)));
    let t0 = Instant::now();
    let p = payload();

    let first = store.begin_scan_at(&p, Some(SESSION), None, t0);
    let later = store.begin_scan_at(&p, Some(SESSION), None, t0 + Duration::from_secs(4));
    for decision in [first, later] {
        assert_eq!(
            decision,
            ScanDecision::Resolved(ScanOutcome { state: ScanState::Present, attendee: Some(john()) })
        );
    }
}

#[test]
fn cached_outcome_expires_after_dedup_window() {
    let mut store = loaded();
    let t0 = Instant::now();
    let p = payload();

    store.begin_scan_at(&p, None, None, t0);
    assert_eq!(store.classify_at(&p, t0 + Duration::from_millis(2999)), ScanState::Error);
    assert_eq!(store.classify_at(&p, t0 + Duration::from_millis(3000)), ScanState::Unknown);
    assert!(matches!(
        store.begin_scan_at(&p, Some(SESSION), None, t0 + Duration::from_millis(3000)),
        ScanDecision::Write(_)
    ));
}

#[test]
fn unknown_payload_is_an_error_without_write() {
    let mut store = loaded();
    let t0 = Instant::now();

    let decision = store.begin_scan_at("-12345", Some(SESSION), None, t0);
    assert_eq!(decision, ScanDecision::Resolved(ScanOutcome { state: ScanState::Error, attendee: None }));
    assert_eq!(store.classify_at("-12345", t0), ScanState::Error);
    assert_eq!(store.count_by_status(SESSION).not_scanned, 1);
}

#[test]
fn new_attendee_clears_cached_error_for_its_payload() {
    let mut store = loaded();
    let t0 = Instant::now();
    let jane = attendee(2, "Jane", "Roe");
    let p = identity::hash(&jane);

    store.begin_scan_at(&p, Some(SESSION), None, t0);
    assert_eq!(store.classify_at(&p, t0), ScanState::Error);

    store.ingest_realtime(RowChange::Attendee(ChangeKind::Insert, jane));
    assert_eq!(store.classify_at(&p, t0), ScanState::Unknown);
    assert!(matches!(store.begin_scan_at(&p, Some(SESSION), None, t0), ScanDecision::Write(_)));
}

#[test]
fn scan_without_open_session_is_an_error() {
    let mut store = loaded();
    let decision = store.begin_scan_at(&payload(), None, None, Instant::now());
    assert_eq!(decision, ScanDecision::Resolved(ScanOutcome { state: ScanState::Error, attendee: Some(john()) }));
}

#[test]
fn failed_write_leaves_projection_untouched() {
    let mut store = loaded();
    let t0 = Instant::now();
    let p = payload();

    assert!(matches!(store.begin_scan_at(&p, Some(SESSION), None, t0), ScanDecision::Write(_)));
    let outcome = store.finish_scan_at(&p, None, t0);

    assert_eq!(outcome.state, ScanState::Error);
    assert_eq!(store.status_for(1, SESSION), Some(AttendanceStatus::NotScanned));
    assert!(store.attendee(1).unwrap().records().is_empty());
    assert_eq!(store.classify_at(&p, t0), ScanState::Error);
}

#[test]
fn failed_write_can_be_retried_immediately() {
    let mut store = loaded();
    let t0 = Instant::now();
    let p = payload();

    assert!(matches!(store.begin_scan_at(&p, Some(SESSION), None, t0), ScanDecision::Write(_)));
    store.finish_scan_at(&p, None, t0);

    let retry = store.begin_scan_at(&p, Some(SESSION), None, t0 + Duration::from_millis(10));
    assert!(matches!(retry, ScanDecision::Write(_)));
    assert_eq!(store.classify_at(&p, t0), ScanState::Processing);
}

#[test]
fn failed_write_hold_expires_with_dedup_window() {
    let mut store = loaded();
    let t0 = Instant::now();
    let p = payload();

    store.begin_scan_at(&p, Some(SESSION), None, t0);
    store.finish_scan_at(&p, None, t0);

    assert_eq!(store.classify_at(&p, t0 + Duration::from_millis(2999)), ScanState::Error);
    assert_eq!(store.classify_at(&p, t0 + Duration::from_millis(3000)), ScanState::Unknown);
}

#[test]
fn session_change_drops_cached_outcomes() {
    let mut store = loaded();
    let t0 = Instant::now();
    let p = payload();
    store.begin_scan_at(&p, None, None, t0);

    store.set_session(Some(SESSION + 1));
    assert_eq!(store.classify_at(&p, t0), ScanState::Unknown);
}
