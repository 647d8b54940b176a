//! Attendance service: loading, scanning, and manual check-ins.
//!
//! DESIGN
//! ======
//! A scan is split around the backend write. `begin_scan` classifies the
//! payload under the store lock and, when a write is needed, marks the
//! payload in flight. `complete_scan` performs the insert with no lock held
//! and folds the confirmed row back in. The scanner pipeline calls the two
//! halves separately so it can show "processing" while the write runs;
//! everyone else calls `scan`.
//!
//! ERROR HANDLING
//! ==============
//! Scan failures are absorbed into the returned classification (`ERROR`)
//! and logged. Manual check-ins are explicit operator actions, so their
//! failures are returned to the caller instead.

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::db::BackendError;
use crate::model::{
    AttendanceStatus, Attendee, CheckInRecord, CheckInStatus, CreatedMethod, NewCheckIn, StatusCounts,
};
use crate::state::AppState;
use crate::store::{ScanDecision, ScanOutcome, StoreError};

/// How many recent sessions a load pulls into the registry.
pub const SESSION_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub attendees: usize,
    pub sessions: usize,
    pub records: usize,
    pub session_id: Option<i64>,
}

/// One roster line: an active attendee and their status in the current
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub attendee: Attendee,
    pub payload: String,
    pub status: AttendanceStatus,
}

// =============================================================================
// LOAD
// =============================================================================

/// Pull attendees, recent sessions, and the current session's records from
/// the backend and merge them in. Safe to repeat: the store ignores rows it
/// already holds, so this doubles as the reconnect backfill.
///
/// # Errors
///
/// Returns the first backend error; nothing is merged in that case.
pub async fn load(state: &AppState) -> Result<LoadSummary, BackendError> {
    let attendees = state.backend.load_attendees().await?;
    let sessions = state.backend.load_sessions(SESSION_HISTORY_LIMIT).await?;
    let session_count = sessions.len();

    let current = sessions.iter().max_by_key(|s| (s.created_at, s.id)).map(|s| s.id);
    let records = match current {
        Some(id) => state.backend.load_records(id).await?,
        None => Vec::new(),
    };

    let current = {
        let mut registry = state.sessions.write().await;
        registry.load(sessions);
        registry.current().map(|s| s.id)
    };
    let attendee_count = attendees.len();
    let added = {
        let mut store = state.store.write().await;
        store.set_session(current);
        store.ingest_load(attendees, records)
    };

    info!(attendees = attendee_count, sessions = session_count, records = added, ?current, "attendance loaded");
    Ok(LoadSummary { attendees: attendee_count, sessions: session_count, records: added, session_id: current })
}

// =============================================================================
// SCAN
// =============================================================================

/// Handle one scanned payload end to end.
pub async fn scan(state: &AppState, payload: &str) -> ScanOutcome {
    match begin_scan(state, payload).await {
        ScanDecision::Resolved(outcome) => outcome,
        ScanDecision::Write(new) => complete_scan(state, payload, new).await,
    }
}

/// Classify a payload and reserve it for writing if needed.
pub async fn begin_scan(state: &AppState, payload: &str) -> ScanDecision {
    let open = state.sessions.read().await.open_session().map(|s| s.id);
    let operator = state.operator_id();
    state
        .store
        .write()
        .await
        .begin_scan_at(payload, open, operator, Instant::now())
}

/// Insert the check-in `begin_scan` asked for and record the outcome.
pub async fn complete_scan(state: &AppState, payload: &str, new: NewCheckIn) -> ScanOutcome {
    let written = match state.backend.insert_record(&new).await {
        Ok(record) => {
            info!(record_id = record.id, attendee_id = record.attendee_id, "scan check-in written");
            Some(record)
        }
        Err(e) => {
            warn!(error = %e, attendee_id = new.attendee_id, "scan check-in failed");
            None
        }
    };
    state
        .store
        .write()
        .await
        .finish_scan_at(payload, written, Instant::now())
}

// =============================================================================
// MANUAL
// =============================================================================

/// Record an operator's manual check-in or correction for the open session.
///
/// # Errors
///
/// `NoOpenSession`, `UnknownAttendee` or `AttendeeDeleted` before any write;
/// `Backend` if the insert fails.
pub async fn mark_manual(
    state: &AppState,
    attendee_id: i64,
    status: CheckInStatus,
) -> Result<CheckInRecord, StoreError> {
    let open = state.sessions.read().await.open_session().map(|s| s.id);
    let Some(session_id) = open else {
        return Err(StoreError::NoOpenSession);
    };
    {
        let store = state.store.read().await;
        let Some(attendee) = store.attendee(attendee_id) else {
            return Err(StoreError::UnknownAttendee(attendee_id));
        };
        if attendee.is_deleted() {
            return Err(StoreError::AttendeeDeleted(attendee_id));
        }
    }

    let new = NewCheckIn {
        attendee_id,
        session_id,
        status,
        created_method: CreatedMethod::Manual,
        created_by: state.operator_id(),
    };
    let record = state.backend.insert_record(&new).await?;
    info!(record_id = record.id, attendee_id, status = status.as_str(), "manual check-in written");
    state.store.write().await.ingest_local_write(record.clone());
    Ok(record)
}

// =============================================================================
// QUERIES
// =============================================================================

/// Totals for the current session, if there is one.
pub async fn counts(state: &AppState) -> Option<(i64, StatusCounts)> {
    let store = state.store.read().await;
    store.session_id().map(|id| (id, store.count_by_status(id)))
}

/// Active attendees with their status in the current session.
pub async fn roster(state: &AppState) -> Vec<RosterEntry> {
    let store = state.store.read().await;
    let session = store.session_id();
    store
        .active_attendees()
        .into_iter()
        .map(|s| RosterEntry {
            attendee: s.attendee().clone(),
            payload: s.payload().to_owned(),
            status: session.map_or(AttendanceStatus::NotScanned, |id| s.status_for(id)),
        })
        .collect()
}

#[cfg(test)]
#[path = "attendance_test.rs"]
mod tests;
