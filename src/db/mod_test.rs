use super::*;
use crate::model::CheckInStatus;

#[test]
fn parses_heartbeat() {
    let msg = parse_notification(r#"{"type":"HEARTBEAT"}"#).unwrap();
    assert_eq!(msg, Some(RealtimeMessage::Heartbeat));
}

#[test]
fn parses_check_in_insert() {
    let payload = r#"{
        "table": "check_ins",
        "type": "INSERT",
        "record": {
            "id": 10, "attendee_id": 1, "session_id": 5, "status": "PRESENT",
            "created_method": "QR", "created_by": null,
            "created_at": "2024-03-01T09:00:00.123456+00:00"
        },
        "old_record": null
    }"#;
    let Some(RealtimeMessage::Change(RowChange::Record(kind, record))) = parse_notification(payload).unwrap() else {
        panic!("expected a record change");
    };
    assert_eq!(kind, ChangeKind::Insert);
    assert_eq!(record.id, 10);
    assert_eq!(record.status, CheckInStatus::Present);
}

#[test]
fn delete_reads_old_record() {
    let payload = r#"{
        "table": "attendees",
        "type": "DELETE",
        "record": null,
        "old_record": {"id": 4, "name": "Ann", "surname": "Lee", "deleted": false}
    }"#;
    let Some(RealtimeMessage::Change(RowChange::Attendee(kind, attendee))) = parse_notification(payload).unwrap()
    else {
        panic!("expected an attendee change");
    };
    assert_eq!(kind, ChangeKind::Delete);
    assert_eq!(attendee.id, 4);
}

#[test]
fn untracked_table_is_skipped() {
    let payload = r#"{"table":"budget_entries","type":"INSERT","record":{"id":1}}"#;
    assert_eq!(parse_notification(payload).unwrap(), None);
}

#[test]
fn malformed_payload_is_an_error() {
    assert!(matches!(parse_notification("not json"), Err(BackendError::InvalidPayload(_))));
    let wrong_shape = r#"{"table":"check_ins","type":"INSERT","record":{"id":"x"}}"#;
    assert!(matches!(parse_notification(wrong_shape), Err(BackendError::InvalidPayload(_))));
    let bad_kind = r#"{"table":"check_ins","type":"UPSERT","record":{}}"#;
    assert!(parse_notification(bad_kind).is_err());
}

#[test]
fn error_codes_and_retryable() {
    assert_eq!(BackendError::Rejected("x".into()).error_code(), "E_WRITE_REJECTED");
    assert!(!BackendError::Rejected("x".into()).retryable());
    assert!(BackendError::ChannelClosed.retryable());
}

#[tokio::test]
async fn dropping_feed_closes_channel() {
    let (tx, rx) = mpsc::channel(4);
    let feed = RealtimeFeed::new(rx, None);
    assert!(forward(&tx, RealtimeMessage::Connected));
    drop(feed);
    assert!(!forward(&tx, RealtimeMessage::Heartbeat));
}
