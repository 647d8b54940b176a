//! Session service: open and close roll-call sessions.
//!
//! DESIGN
//! ======
//! The registry is checked first, under a read lock, so an obviously
//! invalid request never reaches the backend. The write happens with no
//! lock held. The confirmed row is then folded into the registry and the
//! store is pointed at the new current session.
//!
//! ERROR HANDLING
//! ==============
//! The local check is advisory: a second client may open a session between
//! our check and our write. The backend's one-open-session constraint
//! rejects that write and the rejection surfaces as `SessionError::Backend`.

use tracing::info;

use crate::model::RollCallSession;
use crate::sessions::SessionError;
use crate::state::AppState;

/// Open a new session, stamped with the operator identity.
///
/// # Errors
///
/// `AlreadyOpen` while another session is open; `Backend` if the insert
/// fails.
pub async fn open_session(state: &AppState, description: Option<String>) -> Result<RollCallSession, SessionError> {
    let new = state
        .sessions
        .read()
        .await
        .prepare_open(description, state.operator_id())?;

    let row = state.backend.insert_session(&new).await?;
    info!(session_id = row.id, counter = row.counter, "session open confirmed");
    apply_session(state, row.clone()).await;
    Ok(row)
}

/// Close a session by id.
///
/// # Errors
///
/// `NotFound` / `AlreadyClosed` from the registry check; `Backend` if the
/// update fails.
pub async fn close_session(state: &AppState, id: i64) -> Result<RollCallSession, SessionError> {
    state.sessions.read().await.prepare_close(id)?;

    let operator = state.operator_id();
    let row = state.backend.close_session(id, operator.as_deref()).await?;
    info!(session_id = row.id, "session close confirmed");
    apply_session(state, row.clone()).await;
    Ok(row)
}

/// Close whichever session is open.
///
/// # Errors
///
/// `NoOpenSession` when nothing is open, otherwise as [`close_session`].
pub async fn close_current(state: &AppState) -> Result<RollCallSession, SessionError> {
    let open = state.sessions.read().await.open_session().map(|s| s.id);
    let Some(id) = open else {
        return Err(SessionError::NoOpenSession);
    };
    close_session(state, id).await
}

/// All known sessions, newest first.
pub async fn history(state: &AppState) -> Vec<RollCallSession> {
    state.sessions.read().await.history().into_iter().cloned().collect()
}

/// Fold a confirmed session row (local write or realtime push) into the
/// registry and retarget the store's counts at the current session.
pub async fn apply_session(state: &AppState, row: RollCallSession) {
    let current = {
        let mut sessions = state.sessions.write().await;
        sessions.apply(row);
        sessions.current().map(|s| s.id)
    };
    state.store.write().await.set_session(current);
}

/// Drop a session deleted from the backing store.
pub async fn remove_session(state: &AppState, id: i64) {
    let current = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(id);
        sessions.current().map(|s| s.id)
    };
    state.store.write().await.set_session(current);
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
