//! Attendance store: the single in-memory projection of attendees and
//! their check-in records.
//!
//! DESIGN
//! ======
//! Records reach the store through three channels (bulk load, realtime
//! push, the result of this client's own writes) in any order. Record id is
//! the dedup key across all three, and per-attendee ordering is delegated to
//! `AttendeeState`, whose "latest wins" key is `(created_at, id)`. Together
//! these make the final projection independent of arrival order.
//!
//! A record can arrive before its attendee (realtime insert racing the
//! attendee insert). Such records are parked in `orphans` and adopted when
//! the attendee shows up, so nothing is lost.
//!
//! SCANNING
//! ========
//! `begin_scan_at` / `finish_scan_at` are the synchronous halves of a scan.
//! The service calls `begin`, performs the backend write outside the lock if
//! asked to, then calls `finish` with the result. Payloads with a write in
//! flight classify as `Processing`, and outcomes are cached for the dedup
//! window so a code held in front of the camera is written once.
//!
//! TRADE-OFFS
//! ==========
//! Payload hashes can collide. The payload index keeps the first attendee
//! registered for a payload and logs the collision; the other attendee can
//! still be checked in manually.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::attendee::{AttendeeState, RecordChange};
use crate::config::DEFAULT_SCAN_DEDUP_MS;
use crate::db::{BackendError, ChangeKind, RowChange};
use crate::events::EventBus;
use crate::frame::ErrorCode;
use crate::model::{
    AttendanceStatus, Attendee, CheckInRecord, CheckInStatus, CreatedMethod, NewCheckIn, StatusCounts,
};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("attendee not found: {0}")]
    UnknownAttendee(i64),
    #[error("attendee {0} is deleted")]
    AttendeeDeleted(i64),
    #[error("no open session")]
    NoOpenSession,
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownAttendee(_) => "E_ATTENDEE_NOT_FOUND",
            Self::AttendeeDeleted(_) => "E_ATTENDEE_DELETED",
            Self::NoOpenSession => "E_NO_OPEN_SESSION",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

/// Classification of a scanned payload, shown on the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanState {
    Unknown,
    Processing,
    Present,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub state: ScanState,
    pub attendee: Option<Attendee>,
}

/// What the caller must do after `begin_scan_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision {
    /// Nothing to write; the outcome is final.
    Resolved(ScanOutcome),
    /// Insert this check-in, then report back through `finish_scan_at`.
    Write(NewCheckIn),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    AttendeeAdded(Attendee),
    AttendeeUpdated(Attendee),
    AttendeeRemoved(Attendee),
    RecordIngested(CheckInRecord),
    RecordRemoved(CheckInRecord),
    StatusChanged { attendee_id: i64, from: AttendanceStatus, to: AttendanceStatus },
    CountsChanged { session_id: i64, counts: StatusCounts },
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Load,
    Realtime,
    LocalWrite,
}

#[derive(Debug, Clone, Copy)]
struct CachedScan {
    state: ScanState,
    attendee_id: Option<i64>,
    at: Instant,
}

// =============================================================================
// STORE
// =============================================================================

pub struct AttendanceStore {
    attendees: HashMap<i64, AttendeeState>,
    /// Payload -> attendee id. First registration wins on collision.
    by_payload: HashMap<String, i64>,
    /// Record id -> owning attendee id.
    record_owner: HashMap<i64, i64>,
    /// Records whose attendee has not arrived yet, by record id.
    orphans: HashMap<i64, CheckInRecord>,
    /// Session the aggregate counts are reported for.
    session_id: Option<i64>,
    scans: HashMap<String, CachedScan>,
    in_flight: HashSet<String>,
    /// Payloads whose last write failed. Shown as `Error` to the overlay but
    /// never consulted by `begin_scan_at`, so a manual retry reaches the backend.
    failed: HashMap<String, Instant>,
    dedup_window: Duration,
    batching: bool,
    events: EventBus<StoreEvent>,
}

impl Default for AttendanceStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SCAN_DEDUP_MS))
    }
}

impl AttendanceStore {
    #[must_use]
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            attendees: HashMap::new(),
            by_payload: HashMap::new(),
            record_owner: HashMap::new(),
            orphans: HashMap::new(),
            session_id: None,
            scans: HashMap::new(),
            in_flight: HashSet::new(),
            failed: HashMap::new(),
            dedup_window,
            batching: false,
            events: EventBus::new(),
        }
    }

    #[must_use]
    pub fn events(&self) -> &EventBus<StoreEvent> {
        &self.events
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    #[must_use]
    pub fn attendee(&self, id: i64) -> Option<&AttendeeState> {
        self.attendees.get(&id)
    }

    /// Non-deleted attendees ordered by surname, name, id.
    #[must_use]
    pub fn active_attendees(&self) -> Vec<&AttendeeState> {
        let mut active: Vec<_> = self.attendees.values().filter(|s| !s.is_deleted()).collect();
        active.sort_by(|a, b| {
            let (a, b) = (a.attendee(), b.attendee());
            (&a.surname, &a.name, a.id).cmp(&(&b.surname, &b.name, b.id))
        });
        active
    }

    /// The active attendee a scanned payload refers to.
    #[must_use]
    pub fn resolve(&self, payload: &str) -> Option<&AttendeeState> {
        if let Some(state) = self.by_payload.get(payload).and_then(|id| self.attendees.get(id)) {
            if !state.is_deleted() {
                return Some(state);
            }
        }
        self.attendees
            .values()
            .filter(|s| !s.is_deleted() && s.payload() == payload)
            .min_by_key(|s| s.id())
    }

    #[must_use]
    pub fn status_for(&self, attendee_id: i64, session_id: i64) -> Option<AttendanceStatus> {
        self.attendees.get(&attendee_id).map(|s| s.status_for(session_id))
    }

    /// Present/absent/not-scanned totals over all non-deleted attendees.
    #[must_use]
    pub fn count_by_status(&self, session_id: i64) -> StatusCounts {
        self.attendees
            .values()
            .filter(|s| !s.is_deleted())
            .fold(StatusCounts::default(), |mut counts, s| {
                counts.add(s.status_for(session_id));
                counts
            })
    }

    #[must_use]
    pub fn has_record(&self, record_id: i64) -> bool {
        self.record_owner.contains_key(&record_id) || self.orphans.contains_key(&record_id)
    }

    #[must_use]
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    // =========================================================================
    // INGESTION
    // =========================================================================

    /// Set the session aggregate counts are reported for. Cached scan
    /// outcomes belong to the previous session and are dropped.
    pub fn set_session(&mut self, session_id: Option<i64>) {
        if self.session_id == session_id {
            return;
        }
        self.session_id = session_id;
        self.scans.clear();
        self.failed.clear();
        self.publish_counts();
    }

    /// Merge a bulk load. Idempotent: known attendees are updated in place
    /// and known record ids are skipped. Returns the number of new records.
    pub fn ingest_load(&mut self, attendees: Vec<Attendee>, records: Vec<CheckInRecord>) -> usize {
        self.batching = true;
        for attendee in attendees {
            self.upsert_attendee(attendee);
        }
        let mut added = 0;
        for record in records {
            if self.insert_record(record, Source::Load) {
                added += 1;
            }
        }
        self.batching = false;
        self.publish_counts();
        info!(attendees = self.attendees.len(), records = added, "attendance load ingested");
        added
    }

    /// Apply one realtime row change. Session rows belong to the session
    /// registry and are ignored here. Returns true if the projection changed.
    pub fn ingest_realtime(&mut self, change: RowChange) -> bool {
        match change {
            RowChange::Record(ChangeKind::Insert, record) => self.insert_record(record, Source::Realtime),
            RowChange::Record(ChangeKind::Update, record) => self.replace_record(record),
            RowChange::Record(ChangeKind::Delete, record) => self.delete_record(record.id),
            RowChange::Attendee(ChangeKind::Insert, attendee) => self.upsert_attendee(attendee),
            RowChange::Attendee(ChangeKind::Update, attendee) => {
                if self.attendees.contains_key(&attendee.id) {
                    self.upsert_attendee(attendee)
                } else {
                    debug!(attendee_id = attendee.id, "update for unknown attendee ignored");
                    false
                }
            }
            RowChange::Attendee(ChangeKind::Delete, attendee) => self.remove_attendee(attendee.id),
            RowChange::Session(..) => false,
        }
    }

    /// Apply a record this client wrote itself.
    pub fn ingest_local_write(&mut self, record: CheckInRecord) -> bool {
        self.insert_record(record, Source::LocalWrite)
    }

    // =========================================================================
    // SCANNING
    // =========================================================================

    /// Classification snapshot for the overlay. Does not mutate.
    ///
    /// `Unknown` means nothing has been decided for the payload within the
    /// dedup window; the scanner treats it as a cue to call `begin_scan_at`.
    /// A recent failed write reads as `Error` so the scanner does not retry
    /// on every frame.
    #[must_use]
    pub fn classify_at(&self, payload: &str, now: Instant) -> ScanState {
        if self.in_flight.contains(payload) {
            return ScanState::Processing;
        }
        let fresh = |at: Instant| now.saturating_duration_since(at) < self.dedup_window;
        if let Some(cached) = self.scans.get(payload).filter(|c| fresh(c.at)) {
            return cached.state;
        }
        if self.failed.get(payload).is_some_and(|at| fresh(*at)) {
            return ScanState::Error;
        }
        ScanState::Unknown
    }

    /// First half of a scan: classify the payload and decide whether a
    /// check-in must be written.
    pub fn begin_scan_at(
        &mut self,
        payload: &str,
        open_session: Option<i64>,
        created_by: Option<String>,
        now: Instant,
    ) -> ScanDecision {
        self.prune_scans_at(now);

        if self.in_flight.contains(payload) {
            let attendee_id = self.resolve(payload).map(AttendeeState::id);
            return ScanDecision::Resolved(self.outcome(ScanState::Processing, attendee_id));
        }
        if let Some(cached) = self.scans.get(payload) {
            return ScanDecision::Resolved(self.outcome(cached.state, cached.attendee_id));
        }

        let Some(attendee_id) = self.resolve(payload).map(AttendeeState::id) else {
            debug!(payload, "scanned payload matches no attendee");
            self.cache_scan(payload, ScanState::Error, None, now);
            return ScanDecision::Resolved(self.outcome(ScanState::Error, None));
        };
        let Some(session_id) = open_session else {
            warn!(attendee_id, "scan ignored: no open session");
            self.cache_scan(payload, ScanState::Error, Some(attendee_id), now);
            return ScanDecision::Resolved(self.outcome(ScanState::Error, Some(attendee_id)));
        };
        if self.status_for(attendee_id, session_id) == Some(AttendanceStatus::Present) {
            self.cache_scan(payload, ScanState::Present, Some(attendee_id), now);
            return ScanDecision::Resolved(self.outcome(ScanState::Present, Some(attendee_id)));
        }

        self.failed.remove(payload);
        self.in_flight.insert(payload.to_owned());
        ScanDecision::Write(NewCheckIn {
            attendee_id,
            session_id,
            status: CheckInStatus::Present,
            created_method: CreatedMethod::Scan,
            created_by,
        })
    }

    /// Second half of a scan: `written` is the confirmed row, or `None` if
    /// the write failed. A failed write leaves the projection untouched and
    /// is not cached as an outcome.
    pub fn finish_scan_at(&mut self, payload: &str, written: Option<CheckInRecord>, now: Instant) -> ScanOutcome {
        self.in_flight.remove(payload);
        match written {
            Some(record) => {
                let attendee_id = record.attendee_id;
                self.ingest_local_write(record);
                self.cache_scan(payload, ScanState::Present, Some(attendee_id), now);
                self.outcome(ScanState::Present, Some(attendee_id))
            }
            None => {
                self.failed.insert(payload.to_owned(), now);
                let attendee_id = self.resolve(payload).map(AttendeeState::id);
                self.outcome(ScanState::Error, attendee_id)
            }
        }
    }

    fn cache_scan(&mut self, payload: &str, state: ScanState, attendee_id: Option<i64>, now: Instant) {
        self.scans.insert(payload.to_owned(), CachedScan { state, attendee_id, at: now });
    }

    fn prune_scans_at(&mut self, now: Instant) {
        let window = self.dedup_window;
        self.scans.retain(|_, c| now.saturating_duration_since(c.at) < window);
        self.failed.retain(|_, at| now.saturating_duration_since(*at) < window);
    }

    fn outcome(&self, state: ScanState, attendee_id: Option<i64>) -> ScanOutcome {
        let attendee = attendee_id
            .and_then(|id| self.attendees.get(&id))
            .map(|s| s.attendee().clone());
        ScanOutcome { state, attendee }
    }

    // =========================================================================
    // RECORDS
    // =========================================================================

    fn insert_record(&mut self, record: CheckInRecord, source: Source) -> bool {
        if self.has_record(record.id) {
            debug!(record_id = record.id, ?source, "duplicate record ignored");
            return false;
        }
        let Some(state) = self.attendees.get_mut(&record.attendee_id) else {
            debug!(record_id = record.id, attendee_id = record.attendee_id, "record parked until attendee arrives");
            self.orphans.insert(record.id, record);
            return true;
        };
        let change = state.push_record(record.clone());
        self.record_owner.insert(record.id, record.attendee_id);
        self.events.publish(&StoreEvent::RecordIngested(record.clone()));
        self.after_record_change(record.attendee_id, change, &[record.session_id]);
        true
    }

    fn replace_record(&mut self, record: CheckInRecord) -> bool {
        if let Some(orphan) = self.orphans.get_mut(&record.id) {
            *orphan = record;
            return true;
        }
        let Some(&owner) = self.record_owner.get(&record.id) else {
            debug!(record_id = record.id, "update for unknown record ignored");
            return false;
        };
        if owner != record.attendee_id {
            self.delete_record(record.id);
            return self.insert_record(record, Source::Realtime);
        }
        let Some(state) = self.attendees.get_mut(&owner) else {
            return false;
        };
        let old_session = state
            .records()
            .iter()
            .find(|r| r.id == record.id)
            .map_or(record.session_id, |r| r.session_id);
        let before = state.current_status();
        state.remove_record(record.id);
        state.push_record(record.clone());
        let after = state.current_status();
        let change = RecordChange { updated: true, status_changed: (before != after).then_some((before, after)) };
        self.events.publish(&StoreEvent::RecordIngested(record.clone()));
        self.after_record_change(owner, change, &[old_session, record.session_id]);
        true
    }

    fn delete_record(&mut self, record_id: i64) -> bool {
        if self.orphans.remove(&record_id).is_some() {
            return true;
        }
        let Some(owner) = self.record_owner.remove(&record_id) else {
            debug!(record_id, "delete for unknown record ignored");
            return false;
        };
        let Some(state) = self.attendees.get_mut(&owner) else {
            return false;
        };
        let Some(removed) = state.records().iter().find(|r| r.id == record_id).cloned() else {
            return false;
        };
        let change = state.remove_record(record_id);
        self.events.publish(&StoreEvent::RecordRemoved(removed.clone()));
        self.after_record_change(owner, change, &[removed.session_id]);
        true
    }

    fn after_record_change(&mut self, attendee_id: i64, change: RecordChange, sessions: &[i64]) {
        if let Some((from, to)) = change.status_changed {
            self.events.publish(&StoreEvent::StatusChanged { attendee_id, from, to });
        }
        if self.session_id.is_some_and(|s| sessions.contains(&s)) {
            self.publish_counts();
        }
    }

    // =========================================================================
    // ATTENDEES
    // =========================================================================

    fn upsert_attendee(&mut self, attendee: Attendee) -> bool {
        let id = attendee.id;
        if !self.attendees.contains_key(&id) {
            let state = AttendeeState::new(attendee.clone());
            self.scans.remove(state.payload());
            self.failed.remove(state.payload());
            self.attendees.insert(id, state);
            self.index_payload(id);
            if !attendee.deleted {
                self.events.publish(&StoreEvent::AttendeeAdded(attendee));
            }
            self.adopt_orphans(id);
            self.publish_counts();
            return true;
        }
        let Some(state) = self.attendees.get_mut(&id) else {
            return false;
        };

        if state.attendee() == &attendee {
            return false;
        }
        let was_deleted = state.is_deleted();
        let old_payload = state.payload().to_owned();
        let payload_changed = state.set_attendee(attendee.clone());
        if payload_changed {
            self.unindex_payload(id, &old_payload);
            self.index_payload(id);
        }

        match (was_deleted, attendee.deleted) {
            (false, true) => {
                info!(attendee_id = id, "attendee soft-deleted");
                self.events.publish(&StoreEvent::AttendeeRemoved(attendee));
                self.publish_counts();
            }
            (true, false) => {
                self.events.publish(&StoreEvent::AttendeeAdded(attendee));
                self.publish_counts();
            }
            _ => self.events.publish(&StoreEvent::AttendeeUpdated(attendee)),
        }
        true
    }

    fn remove_attendee(&mut self, id: i64) -> bool {
        let Some(state) = self.attendees.remove(&id) else {
            debug!(attendee_id = id, "delete for unknown attendee ignored");
            return false;
        };
        for record in state.records() {
            self.record_owner.remove(&record.id);
        }
        self.unindex_payload(id, state.payload());
        if !state.is_deleted() {
            self.events.publish(&StoreEvent::AttendeeRemoved(state.attendee().clone()));
            self.publish_counts();
        }
        true
    }

    fn adopt_orphans(&mut self, attendee_id: i64) {
        let ids: Vec<i64> = self
            .orphans
            .values()
            .filter(|r| r.attendee_id == attendee_id)
            .map(|r| r.id)
            .collect();
        for id in ids {
            if let Some(record) = self.orphans.remove(&id) {
                self.insert_record(record, Source::Realtime);
            }
        }
    }

    fn index_payload(&mut self, id: i64) {
        let Some(payload) = self.attendees.get(&id).map(|s| s.payload().to_owned()) else {
            return;
        };
        match self.by_payload.get(&payload) {
            None => {
                self.by_payload.insert(payload, id);
            }
            Some(&existing) if existing != id => {
                warn!(%payload, existing, colliding = id, "payload hash collision; keeping first attendee");
            }
            Some(_) => {}
        }
    }

    fn unindex_payload(&mut self, id: i64, payload: &str) {
        if self.by_payload.get(payload) != Some(&id) {
            return;
        }
        self.by_payload.remove(payload);
        let next = self
            .attendees
            .values()
            .filter(|s| s.id() != id && s.payload() == payload)
            .map(AttendeeState::id)
            .min();
        if let Some(next) = next {
            self.by_payload.insert(payload.to_owned(), next);
        }
    }

    fn publish_counts(&self) {
        if self.batching {
            return;
        }
        if let Some(session_id) = self.session_id {
            let counts = self.count_by_status(session_id);
            self.events.publish(&StoreEvent::CountsChanged { session_id, counts });
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
