use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationEvent {
    LeaveSubmitted,
    LeaveApproved,
    LeaveRejected,
    LeaveCancelled,
}

impl NotificationEvent {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Delivery state of a notification row.
///
/// `Sending` marks a row claimed by a worker; only the claiming worker may
/// move it on to Sent, Retry or Failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Retry,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub leave_request_id: Option<u64>,
    pub recipient_email: String,
    pub recipient_name: String,
    pub event_type: NotificationEvent,
    pub subject: String,
    pub body: String,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Eligible for a delivery attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            NotificationStatus::Pending | NotificationStatus::Retry
        ) && self.retry_count < self.max_retries
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Still `Sending` under the claim taken at `claimed_at`.
    pub fn is_held_by(&self, claimed_at: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Sending && self.claimed_at == Some(claimed_at)
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub leave_request_id: Option<u64>,
    pub recipient_email: String,
    pub recipient_name: String,
    pub event_type: NotificationEvent,
    pub subject: String,
    pub body: String,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

/// Unit of work handed to the delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTask {
    pub notification_id: u64,
}
