//! Backing-store boundary: typed queries, writes, and realtime changes.
//!
//! SYSTEM CONTEXT
//! ==============
//! The engine treats persistence as an opaque capability set. `Backend`
//! names that set; `postgres::PgBackend` implements it over SQLx with
//! LISTEN/NOTIFY for realtime, `memory::MemoryBackend` implements it
//! in-process for tests and database-less runs.
//!
//! Realtime changes arrive as JSON envelopes
//! `{table, type, record, old_record}` and are parsed into `RowChange`.

mod listener;
pub mod memory;
pub mod postgres;

use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::frame::ErrorCode;
use crate::model::{Attendee, CheckInRecord, NewCheckIn, NewSession, RollCallSession};

pub const TABLE_ATTENDEES: &str = "attendees";
pub const TABLE_CHECK_INS: &str = "check_ins";
pub const TABLE_SESSIONS: &str = "roll_call_sessions";

/// Postgres notification channel carrying row changes and heartbeats.
pub const REALTIME_CHANNEL: &str = "rollcall_changes";

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("row not found: {0}")]
    NotFound(i64),
    #[error("invalid realtime payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("realtime channel closed")]
    ChannelClosed,
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::Rejected(_) => "E_WRITE_REJECTED",
            Self::NotFound(_) => "E_ROW_NOT_FOUND",
            Self::InvalidPayload(_) => "E_INVALID_PAYLOAD",
            Self::ChannelClosed => "E_CHANNEL_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ChannelClosed)
    }
}

// =============================================================================
// REALTIME
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A typed row-change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange {
    Record(ChangeKind, CheckInRecord),
    Attendee(ChangeKind, Attendee),
    Session(ChangeKind, RollCallSession),
}

/// One message from the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeMessage {
    Connected,
    Disconnected,
    Heartbeat,
    Change(RowChange),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    old_record: Option<serde_json::Value>,
}

/// Parse a realtime notification payload.
///
/// Returns `Ok(None)` for changes on tables the engine does not track.
///
/// # Errors
///
/// Returns `InvalidPayload` for malformed JSON or rows that do not match
/// the table's shape.
pub fn parse_notification(payload: &str) -> Result<Option<RealtimeMessage>, BackendError> {
    let env: Envelope = serde_json::from_str(payload)?;
    if env.kind == "HEARTBEAT" {
        return Ok(Some(RealtimeMessage::Heartbeat));
    }
    let kind: ChangeKind = serde_json::from_value(serde_json::Value::String(env.kind))?;
    // Deletes carry the row in `old_record`.
    let row = match kind {
        ChangeKind::Delete => env.old_record.or(env.record),
        ChangeKind::Insert | ChangeKind::Update => env.record,
    }
    .unwrap_or(serde_json::Value::Null);

    let change = match env.table.as_deref() {
        Some(TABLE_CHECK_INS) => RowChange::Record(kind, serde_json::from_value(row)?),
        Some(TABLE_ATTENDEES) => RowChange::Attendee(kind, serde_json::from_value(row)?),
        Some(TABLE_SESSIONS) => RowChange::Session(kind, serde_json::from_value(row)?),
        _ => return Ok(None),
    };
    Ok(Some(RealtimeMessage::Change(change)))
}

/// Receiving end of a realtime subscription. Dropping the feed (or calling
/// `unsubscribe`) stops the producer task.
pub struct RealtimeFeed {
    rx: mpsc::Receiver<RealtimeMessage>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeFeed {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<RealtimeMessage>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Next message, or `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<RealtimeMessage> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward a message into a feed channel, logging when the consumer lags.
pub(crate) fn forward(tx: &mpsc::Sender<RealtimeMessage>, msg: RealtimeMessage) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("realtime feed full; dropping message");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

// =============================================================================
// BACKEND
// =============================================================================

/// The capability set the engine consumes from its backing store.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn load_attendees(&self) -> Result<Vec<Attendee>, BackendError>;

    /// Most recent sessions, newest first.
    async fn load_sessions(&self, limit: i64) -> Result<Vec<RollCallSession>, BackendError>;

    async fn load_records(&self, session_id: i64) -> Result<Vec<CheckInRecord>, BackendError>;

    async fn insert_record(&self, new: &NewCheckIn) -> Result<CheckInRecord, BackendError>;

    async fn insert_session(&self, new: &NewSession) -> Result<RollCallSession, BackendError>;

    async fn close_session(&self, id: i64, closed_by: Option<&str>) -> Result<RollCallSession, BackendError>;

    async fn subscribe(&self) -> Result<RealtimeFeed, BackendError>;

    async fn send_heartbeat(&self) -> Result<(), BackendError>;

    fn current_user_id(&self) -> Option<String>;
}

// =============================================================================
// POOL
// =============================================================================

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(if max_connections == 0 { DEFAULT_DB_MAX_CONNECTIONS } else { max_connections })
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
