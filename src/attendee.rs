//! Per-attendee check-in history and derived status.
//!
//! DESIGN
//! ======
//! `AttendeeState` owns the attendee row, its records, and a cached index
//! of the current record. The index is private and only ever written by
//! `recompute_current`, which every mutation calls, so "current is the
//! latest record" holds by construction. Mutations return a
//! `RecordChange` describing what happened; the store turns that into
//! events.
//!
//! "Latest" always means the maximum `(created_at, id)` key.

use crate::identity;
use crate::model::{AttendanceStatus, Attendee, CheckInRecord};

/// What a mutation did to the attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChange {
    /// The record set changed.
    pub updated: bool,
    /// Classification of the current record before and after, present only
    /// when it changed.
    pub status_changed: Option<(AttendanceStatus, AttendanceStatus)>,
}

impl RecordChange {
    const NONE: Self = Self { updated: false, status_changed: None };
}

#[derive(Debug, Clone)]
pub struct AttendeeState {
    attendee: Attendee,
    payload: String,
    records: Vec<CheckInRecord>,
    current: Option<usize>,
}

impl AttendeeState {
    #[must_use]
    pub fn new(attendee: Attendee) -> Self {
        let payload = identity::hash(&attendee);
        Self { attendee, payload, records: Vec::new(), current: None }
    }

    #[must_use]
    pub fn attendee(&self) -> &Attendee {
        &self.attendee
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.attendee.id
    }

    /// The scannable payload derived from the attendee identity.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.attendee.deleted
    }

    #[must_use]
    pub fn records(&self) -> &[CheckInRecord] {
        &self.records
    }

    #[must_use]
    pub fn has_record(&self, record_id: i64) -> bool {
        self.records.iter().any(|r| r.id == record_id)
    }

    /// Latest record across the whole history, if any.
    #[must_use]
    pub fn current_record(&self) -> Option<&CheckInRecord> {
        self.current.map(|i| &self.records[i])
    }

    /// Classification of the current record.
    #[must_use]
    pub fn current_status(&self) -> AttendanceStatus {
        self.current_record()
            .map_or(AttendanceStatus::NotScanned, |r| r.status.into())
    }

    /// Replace the attendee row (name change, soft delete). Returns true if
    /// the payload changed.
    pub fn set_attendee(&mut self, attendee: Attendee) -> bool {
        let payload = identity::hash(&attendee);
        let changed = payload != self.payload;
        self.attendee = attendee;
        self.payload = payload;
        changed
    }

    /// Append a record. A record whose id is already present is ignored.
    pub fn push_record(&mut self, record: CheckInRecord) -> RecordChange {
        if self.has_record(record.id) {
            return RecordChange::NONE;
        }
        let before = self.current_status();
        self.records.push(record);
        self.recompute_current();
        self.change_from(before)
    }

    /// Remove a record by id. Unknown ids are ignored.
    pub fn remove_record(&mut self, record_id: i64) -> RecordChange {
        let Some(pos) = self.records.iter().position(|r| r.id == record_id) else {
            return RecordChange::NONE;
        };
        let before = self.current_status();
        self.records.remove(pos);
        self.recompute_current();
        self.change_from(before)
    }

    /// Status within one session: the latest record of that session decides.
    #[must_use]
    pub fn status_for(&self, session_id: i64) -> AttendanceStatus {
        self.records
            .iter()
            .filter(|r| r.session_id == session_id)
            .max_by_key(|r| r.recency_key())
            .map_or(AttendanceStatus::NotScanned, |r| r.status.into())
    }

    fn recompute_current(&mut self) {
        self.current = self
            .records
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| r.recency_key())
            .map(|(i, _)| i);
    }

    fn change_from(&self, before: AttendanceStatus) -> RecordChange {
        let after = self.current_status();
        RecordChange { updated: true, status_changed: (before != after).then_some((before, after)) }
    }
}

#[cfg(test)]
#[path = "attendee_test.rs"]
mod tests;
