//! Attendance routes: roster, counts, scans, manual check-ins.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connectivity::ConnectionState;
use crate::model::{CheckInRecord, CheckInStatus, StatusCounts};
use crate::routes::backend_error_to_status;
use crate::scan::overlay::OverlayEntry;
use crate::services::attendance::{self, RosterEntry};
use crate::state::AppState;
use crate::store::{ScanOutcome, StoreError};

#[derive(Debug, Serialize)]
pub struct CountsResponse {
    pub session_id: Option<i64>,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

#[derive(Debug, Deserialize)]
pub struct CheckInBody {
    #[serde(default)]
    pub status: Option<CheckInStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub payload: String,
}

/// `GET /api/attendees` — active attendees with current-session status.
pub async fn list_attendees(State(state): State<AppState>) -> Json<Vec<RosterEntry>> {
    Json(attendance::roster(&state).await)
}

/// `GET /api/counts` — present/absent/not-scanned for the current session.
pub async fn counts(State(state): State<AppState>) -> Json<CountsResponse> {
    let response = match attendance::counts(&state).await {
        Some((session_id, counts)) => CountsResponse { session_id: Some(session_id), counts },
        None => CountsResponse { session_id: None, counts: StatusCounts::default() },
    };
    Json(response)
}

/// `POST /api/attendees/:id/check-in` — manual check-in or correction.
pub async fn check_in(
    State(state): State<AppState>,
    Path(attendee_id): Path<i64>,
    Json(body): Json<CheckInBody>,
) -> Result<Json<CheckInRecord>, StatusCode> {
    let status = body.status.unwrap_or(CheckInStatus::Present);
    attendance::mark_manual(&state, attendee_id, status)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(attendee_id, error = %e, "manual check-in rejected");
            store_error_to_status(&e)
        })
}

/// `POST /api/scan` — submit a scanned payload.
pub async fn scan(State(state): State<AppState>, Json(body): Json<ScanBody>) -> Result<Json<ScanOutcome>, StatusCode> {
    let payload = body.payload.trim();
    if payload.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(attendance::scan(&state, payload).await))
}

/// `GET /api/overlay` — current overlay entries.
pub async fn overlay(State(state): State<AppState>) -> Json<Vec<OverlayEntry>> {
    Json(state.overlay.snapshot())
}

/// `GET /api/realtime` — realtime channel state.
pub async fn realtime_state(State(state): State<AppState>) -> Json<ConnectionState> {
    Json(state.connectivity().state())
}

pub(crate) fn store_error_to_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::UnknownAttendee(_) => StatusCode::NOT_FOUND,
        StoreError::AttendeeDeleted(_) => StatusCode::GONE,
        StoreError::NoOpenSession => StatusCode::CONFLICT,
        StoreError::Backend(e) => backend_error_to_status(e),
    }
}

#[cfg(test)]
#[path = "attendance_test.rs"]
mod tests;
