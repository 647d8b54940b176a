//! Roll-call session registry.
//!
//! DESIGN
//! ======
//! Sessions move `OPEN -> CLOSED` and never back. The registry is the
//! client-side gate for "at most one open session": `prepare_open` and
//! `prepare_close` validate against the local projection before any write
//! is issued, and `apply` folds confirmed rows (local writes and realtime
//! pushes alike) back in. Confirmed rows are never rejected, since the
//! backing store is authoritative; a second open row only logs a warning.
//!
//! "Current" is the most recently created session, open or closed, so
//! status queries keep working against the last session after it closes.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::db::BackendError;
use crate::events::EventBus;
use crate::frame::ErrorCode;
use crate::model::{NewSession, RollCallSession};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is already open")]
    AlreadyOpen(i64),
    #[error("session {0} is already closed")]
    AlreadyClosed(i64),
    #[error("session not found: {0}")]
    NotFound(i64),
    #[error("no open session")]
    NoOpenSession,
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyOpen(_) => "E_SESSION_ALREADY_OPEN",
            Self::AlreadyClosed(_) => "E_SESSION_ALREADY_CLOSED",
            Self::NotFound(_) => "E_SESSION_NOT_FOUND",
            Self::NoOpenSession => "E_NO_OPEN_SESSION",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened(RollCallSession),
    Closed(RollCallSession),
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<i64, RollCallSession>,
    events: EventBus<SessionEvent>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    /// Seed from a bulk load. Rows already known are replaced without
    /// emitting events.
    pub fn load(&mut self, sessions: Vec<RollCallSession>) {
        for session in sessions {
            self.sessions.insert(session.id, session);
        }
        if self.open_sessions().count() > 1 {
            warn!(open = self.open_sessions().count(), "loaded more than one open session");
        }
        info!(count = self.sessions.len(), "session registry loaded");
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<&RollCallSession> {
        self.sessions.get(&id)
    }

    /// The most recently created session, open or closed.
    #[must_use]
    pub fn current(&self) -> Option<&RollCallSession> {
        self.sessions.values().max_by_key(|s| (s.created_at, s.id))
    }

    /// The open session, if any.
    #[must_use]
    pub fn open_session(&self) -> Option<&RollCallSession> {
        self.open_sessions().max_by_key(|s| (s.created_at, s.id))
    }

    /// All sessions, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<&RollCallSession> {
        let mut all: Vec<_> = self.sessions.values().collect();
        all.sort_by_key(|s| std::cmp::Reverse((s.created_at, s.id)));
        all
    }

    /// Validate an open request and build the row to insert.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyOpen` while another session has no `closed_at`.
    pub fn prepare_open(
        &self,
        description: Option<String>,
        created_by: Option<String>,
    ) -> Result<NewSession, SessionError> {
        if let Some(open) = self.open_session() {
            return Err(SessionError::AlreadyOpen(open.id));
        }
        let counter = self.sessions.values().map(|s| s.counter).max().unwrap_or(0) + 1;
        Ok(NewSession { counter, created_by, description })
    }

    /// Validate a close request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `AlreadyClosed` for sessions
    /// that already carry `closed_at`.
    pub fn prepare_close(&self, id: i64) -> Result<&RollCallSession, SessionError> {
        let session = self.sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        if !session.is_open() {
            return Err(SessionError::AlreadyClosed(id));
        }
        Ok(session)
    }

    /// Fold a confirmed session row into the registry and publish the
    /// lifecycle transition it represents, if any.
    pub fn apply(&mut self, session: RollCallSession) -> Option<SessionEvent> {
        let previous = self.sessions.insert(session.id, session.clone());
        let event = match previous {
            None if session.is_open() => {
                if self.open_sessions().count() > 1 {
                    warn!(session_id = session.id, "second open session confirmed by backend");
                }
                info!(session_id = session.id, counter = session.counter, "session opened");
                Some(SessionEvent::Opened(session))
            }
            Some(prev) if prev.is_open() && !session.is_open() => {
                info!(session_id = session.id, "session closed");
                Some(SessionEvent::Closed(session))
            }
            Some(prev) if !prev.is_open() && session.is_open() => {
                // Closed is terminal; keep the closed row.
                warn!(session_id = prev.id, "ignoring reopen of closed session");
                self.sessions.insert(prev.id, prev);
                None
            }
            _ => None,
        };
        if let Some(event) = &event {
            self.events.publish(event);
        }
        event
    }

    /// Drop a session deleted from the backing store.
    pub fn remove(&mut self, id: i64) -> Option<RollCallSession> {
        self.sessions.remove(&id)
    }

    fn open_sessions(&self) -> impl Iterator<Item = &RollCallSession> {
        self.sessions.values().filter(|s| s.is_open())
    }
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
