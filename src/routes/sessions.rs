//! Roll-call session routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::warn;

use crate::model::RollCallSession;
use crate::routes::backend_error_to_status;
use crate::services::session;
use crate::sessions::SessionError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionBody {
    #[serde(default)]
    pub description: Option<String>,
}

/// `GET /api/sessions` — session history, newest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<RollCallSession>> {
    Json(session::history(&state).await)
}

/// `POST /api/sessions` — open a new session.
pub async fn open_session(
    State(state): State<AppState>,
    Json(body): Json<OpenSessionBody>,
) -> Result<(StatusCode, Json<RollCallSession>), StatusCode> {
    let description = body.description.filter(|d| !d.trim().is_empty());
    match session::open_session(&state, description).await {
        Ok(row) => Ok((StatusCode::CREATED, Json(row))),
        Err(e) => {
            warn!(error = %e, "session open rejected");
            Err(session_error_to_status(&e))
        }
    }
}

/// `POST /api/sessions/:id/close` — close a session.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RollCallSession>, StatusCode> {
    session::close_session(&state, id).await.map(Json).map_err(|e| {
        warn!(session_id = id, error = %e, "session close rejected");
        session_error_to_status(&e)
    })
}

pub(crate) fn session_error_to_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::AlreadyOpen(_) | SessionError::AlreadyClosed(_) | SessionError::NoOpenSession => {
            StatusCode::CONFLICT
        }
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Backend(e) => backend_error_to_status(e),
    }
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
