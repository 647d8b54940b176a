//! Domain rows shared by every component.
//!
//! DESIGN
//! ======
//! These types mirror the rows of the backing store one-to-one. They are
//! plain data: all derived state (current record, status per session,
//! counts) lives in `attendee`, `store` and `sessions`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// ENUMS
// =============================================================================

/// Status written into a check-in record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckInStatus {
    Present,
    #[serde(alias = "MISSING")]
    Absent,
}

/// How a check-in record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreatedMethod {
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "QR", alias = "SCAN")]
    Scan,
}

impl CreatedMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Scan => "QR",
        }
    }
}

impl CheckInStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
        }
    }
}

/// Derived presence of one attendee within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    NotScanned,
}

impl From<CheckInStatus> for AttendanceStatus {
    fn from(status: CheckInStatus) -> Self {
        match status {
            CheckInStatus::Present => Self::Present,
            CheckInStatus::Absent => Self::Absent,
        }
    }
}

// =============================================================================
// ROWS
// =============================================================================

/// A person tracked for attendance. Mirrors the `attendees` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: i64,
    pub name: String,
    pub surname: String,
    /// Soft-delete flag. Deleted attendees keep their history but leave
    /// every active view.
    #[serde(default)]
    pub deleted: bool,
}

/// One immutable attendance observation. Mirrors the `check_ins` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRecord {
    pub id: i64,
    pub attendee_id: i64,
    pub session_id: i64,
    pub status: CheckInStatus,
    pub created_method: CreatedMethod,
    pub created_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CheckInRecord {
    /// Ordering key for "latest wins": timestamp first, higher id breaks ties.
    #[must_use]
    pub fn recency_key(&self) -> (OffsetDateTime, i64) {
        (self.created_at, self.id)
    }
}

/// A roll-call session. Mirrors the `roll_call_sessions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCallSession {
    pub id: i64,
    pub counter: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub closed_by: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RollCallSession {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

// =============================================================================
// WRITE REQUESTS
// =============================================================================

/// A check-in the client asks the backend to insert. The backend assigns
/// `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCheckIn {
    pub attendee_id: i64,
    pub session_id: i64,
    pub status: CheckInStatus,
    pub created_method: CreatedMethod,
    pub created_by: Option<String>,
}

/// A session the client asks the backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub counter: i64,
    pub created_by: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// AGGREGATES
// =============================================================================

/// Attendance totals for one session over all active attendees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub present: usize,
    pub absent: usize,
    pub not_scanned: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::NotScanned => self.not_scanned += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.present + self.absent + self.not_scanned
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
