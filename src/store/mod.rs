//! Persistence seams for the leave engine and the delivery subsystem.
//!
//! Every state change that can race is expressed as one guarded operation:
//! the predicate ("status is still pending", "balance still covers the
//! request", "row is still claimed by me") is checked by the store in the
//! same step that writes, never by the caller beforehand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    EmployeeProfile, LeaveBalance, LeaveRequest, LeaveStatus, LeaveType, NewLeaveRequest,
    NewNotification, Notification, NotificationStatus,
};

pub mod memory;
pub mod mysql;

pub use memory::{MemoryEmployeeDirectory, MemoryLeaveStore, MemoryNotificationRepository};
pub use mysql::{MySqlEmployeeDirectory, MySqlLeaveStore, MySqlNotificationRepository};

const DEFAULT_PER_PAGE: u32 = 10;
const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaveFilter {
    pub employee_id: Option<u64>,
    pub status: Option<LeaveStatus>,
    /// 1-based.
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl LeaveFilter {
    /// Resolved (page, per_page).
    pub fn pagination(&self) -> (u32, u32) {
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let page = self.page.unwrap_or(1).max(1);
        (page, per_page)
    }

    pub fn offset(&self) -> u64 {
        let (page, per_page) = self.pagination();
        u64::from(page - 1) * u64::from(per_page)
    }

    pub fn matches(&self, request: &LeaveRequest) -> bool {
        self.employee_id.is_none_or(|id| id == request.employee_id)
            && self.status.is_none_or(|status| status == request.status)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeavePage {
    pub data: Vec<LeaveRequest>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// Fields stamped on a request when it is approved.
#[derive(Debug, Clone)]
pub struct Approval {
    pub approver_id: u64,
    pub notes: Option<String>,
    pub approved_at: DateTime<Utc>,
    pub salary_deduction: Option<f64>,
}

/// Fields stamped on a request when it is rejected or cancelled.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Deciding administrator; `None` for an employee's own cancellation.
    pub actor_id: Option<u64>,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDeduction {
    pub employee_id: u64,
    pub leave_type: LeaveType,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    Approved(LeaveRequest),
    /// The status guard failed: the request is missing or already decided.
    NotPending,
    /// The balance guard failed; nothing was written.
    InsufficientBalance,
}

/// Outcome of a failed send attempt, as decided by the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    /// `Retry` or `Failed`.
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create_request(&self, request: NewLeaveRequest) -> Result<LeaveRequest>;

    async fn get_request(&self, id: u64) -> Result<Option<LeaveRequest>>;

    async fn list_requests(&self, filter: &LeaveFilter) -> Result<LeavePage>;

    /// Pending→Approved and, when `deduction` is given, the guarded balance
    /// decrement. Both land or neither does.
    async fn approve_request(
        &self,
        id: u64,
        approval: &Approval,
        deduction: Option<&BalanceDeduction>,
    ) -> Result<ApprovalOutcome>;

    /// Guarded Pending→`to` for Rejected or Cancelled. `None` when the
    /// request is no longer pending.
    async fn close_request(
        &self,
        id: u64,
        to: LeaveStatus,
        decision: &Decision,
    ) -> Result<Option<LeaveRequest>>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
    ) -> Result<Option<LeaveBalance>>;

    async fn list_balances(&self, employee_id: u64) -> Result<Vec<LeaveBalance>>;

    /// Administrative upsert.
    async fn set_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        balance: u32,
        at: DateTime<Utc>,
    ) -> Result<LeaveBalance>;

    /// Applies `delta` only if the result stays non-negative. `None` when the
    /// guard fails or no row exists.
    async fn adjust_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<LeaveBalance>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: NewNotification) -> Result<Notification>;

    async fn get(&self, id: u64) -> Result<Option<Notification>>;

    /// Flips a due row to `Sending`. `None` if the row is not due, already
    /// claimed, or finished. The returned row's `claimed_at` is the claim
    /// token the holder passes back when recording the outcome.
    async fn claim(&self, id: u64, now: DateTime<Utc>) -> Result<Option<Notification>>;

    /// `Sending`→`Sent`. False unless the row is still held by the claim
    /// taken at `claimed_at`.
    async fn mark_sent(
        &self,
        id: u64,
        claimed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// `Sending`→`Retry`/`Failed`. False unless the row is still held by the
    /// claim taken at `claimed_at`.
    async fn record_failure(
        &self,
        id: u64,
        claimed_at: DateTime<Utc>,
        failure: &AttemptFailure,
    ) -> Result<bool>;

    /// Returns claims taken before `claimed_before` to `Retry`, due at `now`.
    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Rows with status Pending/Retry, retry time reached, and attempts left.
    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Notification>>;

    async fn list_by_status(
        &self,
        status: NotificationStatus,
        limit: u32,
    ) -> Result<Vec<Notification>>;
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn get_employee(&self, employee_id: u64) -> Result<Option<EmployeeProfile>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        assert_eq!(LeaveFilter::default().pagination(), (1, 10));

        let filter = LeaveFilter {
            page: Some(0),
            per_page: Some(500),
            ..Default::default()
        };
        assert_eq!(filter.pagination(), (1, 100));
        assert_eq!(filter.offset(), 0);

        let filter = LeaveFilter {
            page: Some(3),
            per_page: Some(20),
            ..Default::default()
        };
        assert_eq!(filter.offset(), 40);
    }
}
