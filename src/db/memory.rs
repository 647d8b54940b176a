//! In-process backend with the same contract as the Postgres one.
//!
//! Every write is echoed to realtime subscribers the way the Postgres row
//! triggers do, including writes issued by this client, so the engine sees
//! its own writes twice (once locally, once over realtime) exactly as it
//! does in production. Test hooks allow injecting write failures, remote
//! changes, and channel drops.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;

use super::{Backend, BackendError, ChangeKind, RealtimeFeed, RealtimeMessage, RowChange, forward};
use crate::model::{Attendee, CheckInRecord, NewCheckIn, NewSession, RollCallSession};

const FEED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    attendees: BTreeMap<i64, Attendee>,
    sessions: BTreeMap<i64, RollCallSession>,
    records: BTreeMap<i64, CheckInRecord>,
    next_id: i64,
    last_ts: Option<OffsetDateTime>,
    failing_writes: usize,
    subscribers: Vec<mpsc::Sender<RealtimeMessage>>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Wall clock, nudged forward so consecutive writes never share a timestamp.
    fn now(&mut self) -> OffsetDateTime {
        let mut now = OffsetDateTime::now_utc();
        if let Some(last) = self.last_ts {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_ts = Some(now);
        now
    }

    fn take_failure(&mut self) -> Result<(), BackendError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(BackendError::Rejected("injected write failure".into()));
        }
        Ok(())
    }

    fn broadcast(&mut self, msg: &RealtimeMessage) {
        self.subscribers.retain(|tx| forward(tx, msg.clone()));
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    user_id: Option<String>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(user_id: Option<String>) -> Self {
        Self { tables: Mutex::new(Tables::default()), user_id }
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an attendee as if another client created it.
    pub fn add_attendee(&self, name: &str, surname: &str) -> Attendee {
        let mut t = self.tables();
        let attendee = Attendee { id: t.next_id(), name: name.into(), surname: surname.into(), deleted: false };
        t.attendees.insert(attendee.id, attendee.clone());
        t.broadcast(&RealtimeMessage::Change(RowChange::Attendee(ChangeKind::Insert, attendee.clone())));
        attendee
    }

    /// Overwrite an attendee row (rename, soft delete) and notify.
    pub fn update_attendee(&self, attendee: Attendee) {
        let mut t = self.tables();
        t.attendees.insert(attendee.id, attendee.clone());
        t.broadcast(&RealtimeMessage::Change(RowChange::Attendee(ChangeKind::Update, attendee)));
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.tables().failing_writes = n;
    }

    /// Deliver a message to every subscriber without touching the tables.
    pub fn push(&self, msg: RealtimeMessage) {
        self.tables().broadcast(&msg);
    }

    /// Close every realtime subscription, as a dropped socket would.
    pub fn disconnect_all(&self) {
        let mut t = self.tables();
        t.broadcast(&RealtimeMessage::Disconnected);
        t.subscribers.clear();
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables().records.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut t = self.tables();
        t.subscribers.retain(|tx| !tx.is_closed());
        t.subscribers.len()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn load_attendees(&self) -> Result<Vec<Attendee>, BackendError> {
        Ok(self.tables().attendees.values().cloned().collect())
    }

    async fn load_sessions(&self, limit: i64) -> Result<Vec<RollCallSession>, BackendError> {
        let mut sessions: Vec<_> = self.tables().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| std::cmp::Reverse((s.created_at, s.id)));
        sessions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(sessions)
    }

    async fn load_records(&self, session_id: i64) -> Result<Vec<CheckInRecord>, BackendError> {
        Ok(self
            .tables()
            .records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_record(&self, new: &NewCheckIn) -> Result<CheckInRecord, BackendError> {
        let mut t = self.tables();
        t.take_failure()?;
        if !t.attendees.contains_key(&new.attendee_id) {
            return Err(BackendError::Rejected(format!("unknown attendee {}", new.attendee_id)));
        }
        if !t.sessions.contains_key(&new.session_id) {
            return Err(BackendError::Rejected(format!("unknown session {}", new.session_id)));
        }
        let record = CheckInRecord {
            id: t.next_id(),
            attendee_id: new.attendee_id,
            session_id: new.session_id,
            status: new.status,
            created_method: new.created_method,
            created_by: new.created_by.clone(),
            created_at: t.now(),
        };
        t.records.insert(record.id, record.clone());
        t.broadcast(&RealtimeMessage::Change(RowChange::Record(ChangeKind::Insert, record.clone())));
        Ok(record)
    }

    async fn insert_session(&self, new: &NewSession) -> Result<RollCallSession, BackendError> {
        let mut t = self.tables();
        t.take_failure()?;
        if t.sessions.values().any(RollCallSession::is_open) {
            return Err(BackendError::Rejected("a session is already open".into()));
        }
        let session = RollCallSession {
            id: t.next_id(),
            counter: new.counter,
            created_at: t.now(),
            created_by: new.created_by.clone(),
            closed_at: None,
            closed_by: None,
            description: new.description.clone(),
        };
        t.sessions.insert(session.id, session.clone());
        t.broadcast(&RealtimeMessage::Change(RowChange::Session(ChangeKind::Insert, session.clone())));
        Ok(session)
    }

    async fn close_session(&self, id: i64, closed_by: Option<&str>) -> Result<RollCallSession, BackendError> {
        let mut t = self.tables();
        t.take_failure()?;
        let now = t.now();
        let session = t.sessions.get_mut(&id).ok_or(BackendError::NotFound(id))?;
        if !session.is_open() {
            return Err(BackendError::Rejected(format!("session {id} is already closed")));
        }
        session.closed_at = Some(now);
        session.closed_by = closed_by.map(str::to_owned);
        let session = session.clone();
        t.broadcast(&RealtimeMessage::Change(RowChange::Session(ChangeKind::Update, session.clone())));
        Ok(session)
    }

    async fn subscribe(&self) -> Result<RealtimeFeed, BackendError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        forward(&tx, RealtimeMessage::Connected);
        self.tables().subscribers.push(tx);
        Ok(RealtimeFeed::new(rx, None))
    }

    async fn send_heartbeat(&self) -> Result<(), BackendError> {
        self.tables().broadcast(&RealtimeMessage::Heartbeat);
        Ok(())
    }

    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
