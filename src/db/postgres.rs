//! Postgres backend over SQLx.
//!
//! DESIGN
//! ======
//! Queries are typed tuples mapped into model rows. Realtime uses a
//! dedicated `PgListener` on `REALTIME_CHANNEL`; row triggers (see the
//! migration) notify every insert/update/delete. A heartbeat is a
//! notification on the same channel, so receiving it back proves the whole
//! round trip is alive.
//!
//! ERROR HANDLING
//! ==============
//! The listener task (see `listener`) never exits on transport errors: it
//! reports `Disconnected`, reconnects the `PgListener` with backoff, and
//! reports `Connected` as soon as LISTEN is re-issued. Unparsable
//! notifications are logged and skipped.

use serde::de::DeserializeOwned;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::info;

use super::listener::{self, NotificationSource};
use super::{Backend, BackendError, REALTIME_CHANNEL, RealtimeFeed};
use crate::model::{Attendee, CheckInRecord, NewCheckIn, NewSession, RollCallSession};

const FEED_CAPACITY: usize = 1024;
const HEARTBEAT_PAYLOAD: &str = r#"{"type":"HEARTBEAT"}"#;

type RecordRow = (i64, i64, i64, String, String, Option<String>, OffsetDateTime);
type SessionRow = (
    i64,
    i64,
    OffsetDateTime,
    Option<String>,
    Option<OffsetDateTime>,
    Option<String>,
    Option<String>,
);

const RECORD_COLUMNS: &str = "id, attendee_id, session_id, status, created_method, created_by, created_at";
const SESSION_COLUMNS: &str = "id, counter, created_at, created_by, closed_at, closed_by, description";

pub struct PgBackend {
    pool: PgPool,
    user_id: Option<String>,
}

impl PgBackend {
    #[must_use]
    pub fn new(pool: PgPool, user_id: Option<String>) -> Self {
        Self { pool, user_id }
    }
}

#[async_trait::async_trait]
impl Backend for PgBackend {
    async fn load_attendees(&self) -> Result<Vec<Attendee>, BackendError> {
        let rows = sqlx::query_as::<_, (i64, String, String, bool)>(
            "SELECT id, name, surname, deleted FROM attendees ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, surname, deleted)| Attendee { id, name, surname, deleted })
            .collect())
    }

    async fn load_sessions(&self, limit: i64) -> Result<Vec<RollCallSession>, BackendError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM roll_call_sessions ORDER BY created_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(session_from_row).collect())
    }

    async fn load_records(&self, session_id: i64) -> Result<Vec<CheckInRecord>, BackendError> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM check_ins WHERE session_id = $1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn insert_record(&self, new: &NewCheckIn) -> Result<CheckInRecord, BackendError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "INSERT INTO check_ins (attendee_id, session_id, status, created_method, created_by) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {RECORD_COLUMNS}"
        ))
        .bind(new.attendee_id)
        .bind(new.session_id)
        .bind(new.status.as_str())
        .bind(new.created_method.as_str())
        .bind(&new.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(reject_constraint)?;
        record_from_row(row)
    }

    async fn insert_session(&self, new: &NewSession) -> Result<RollCallSession, BackendError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "INSERT INTO roll_call_sessions (counter, created_by, description) \
             VALUES ($1, $2, $3) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(new.counter)
        .bind(&new.created_by)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await
        .map_err(reject_constraint)?;
        Ok(session_from_row(row))
    }

    async fn close_session(&self, id: i64, closed_by: Option<&str>) -> Result<RollCallSession, BackendError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE roll_call_sessions SET closed_at = now(), closed_by = $2 \
             WHERE id = $1 AND closed_at IS NULL RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(closed_by)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return Ok(session_from_row(row));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roll_call_sessions WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Err(BackendError::Rejected(format!("session {id} is already closed")))
        } else {
            Err(BackendError::NotFound(id))
        }
    }

    async fn subscribe(&self) -> Result<RealtimeFeed, BackendError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(REALTIME_CHANNEL).await?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let task = tokio::spawn(listener::run(listener, tx));
        info!(channel = REALTIME_CHANNEL, "realtime subscription started");
        Ok(RealtimeFeed::new(rx, Some(task)))
    }

    async fn send_heartbeat(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(REALTIME_CHANNEL)
            .bind(HEARTBEAT_PAYLOAD)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

// =============================================================================
// LISTENER
// =============================================================================

#[async_trait::async_trait]
impl NotificationSource for PgListener {
    async fn next_payload(&mut self) -> Result<Option<String>, BackendError> {
        Ok(self.try_recv().await?.map(|n| n.payload().to_owned()))
    }

    // Any statement through the listener reconnects it and re-issues LISTEN.
    async fn reconnect(&mut self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&mut *self).await?;
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_enum<T: DeserializeOwned>(raw: String) -> Result<T, BackendError> {
    Ok(serde_json::from_value(serde_json::Value::String(raw))?)
}

fn record_from_row(row: RecordRow) -> Result<CheckInRecord, BackendError> {
    let (id, attendee_id, session_id, status, created_method, created_by, created_at) = row;
    Ok(CheckInRecord {
        id,
        attendee_id,
        session_id,
        status: parse_enum(status)?,
        created_method: parse_enum(created_method)?,
        created_by,
        created_at,
    })
}

fn session_from_row(row: SessionRow) -> RollCallSession {
    let (id, counter, created_at, created_by, closed_at, closed_by, description) = row;
    RollCallSession { id, counter, created_at, created_by, closed_at, closed_by, description }
}

fn reject_constraint(err: sqlx::Error) -> BackendError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() {
            return BackendError::Rejected(db.message().to_owned());
        }
    }
    BackendError::Database(err)
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
