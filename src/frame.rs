//! Frame — the JSON envelope exchanged with UI clients.
//!
//! ARCHITECTURE
//! ============
//! Engine events (store, session, overlay, connectivity) go out as
//! `request` frames with no parent. Client commands arrive as `request`
//! frames too, and each one gets exactly one terminal reply (`done` or
//! `error`) whose `parent_id` is the command's id.
//!
//! DESIGN
//! ======
//! - `data` is a flat JSON object.
//! - The syscall prefix names the component ("attendance", "session",
//!   "overlay", "realtime", "gateway"); the suffix names the operation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

// Keys every error reply carries in `data`.
pub const FRAME_MESSAGE: &str = "message";
pub const FRAME_CODE: &str = "code";
pub const FRAME_RETRYABLE: &str = "retryable";

pub type Data = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Unix time in milliseconds.
    pub ts: i64,
    /// Roll-call session the frame concerns, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    pub syscall: String,
    pub status: Status,
    pub data: Data,
}

/// Errors that can be sent to a client as an `error` reply.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

fn unix_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(0)
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

impl Frame {
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: unix_ms(),
            session_id: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Successful terminal reply to this frame.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Error reply carrying only a message.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        self.reply(Status::Error, Data::from([(FRAME_MESSAGE.to_owned(), Value::String(message.into()))]))
    }

    /// Error reply carrying the code, message, and retryable flag of `err`.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        self.error(err.to_string())
            .with_data(FRAME_CODE, err.error_code())
            .with_data(FRAME_RETRYABLE, err.retryable())
    }

    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            parent_id: Some(self.id),
            session_id: self.session_id,
            status,
            data,
            ..Self::request(self.syscall.clone(), Data::new())
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// SYSCALL
// =============================================================================

impl Frame {
    /// Component part of the syscall: everything before the first ':'.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// Operation part of the syscall: everything after the first ':'.
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
