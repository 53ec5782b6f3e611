//! In-process stores. Each store keeps its state behind one mutex, so every
//! guarded operation is a single critical section with no await inside.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    Approval, ApprovalOutcome, AttemptFailure, BalanceDeduction, BalanceStore, Decision,
    EmployeeDirectory, LeaveFilter, LeavePage, NotificationRepository, RequestStore,
};
use crate::error::{Error, Result};
use crate::model::{
    EmployeeProfile, LeaveBalance, LeaveRequest, LeaveStatus, LeaveType, NewLeaveRequest,
    NewNotification, Notification, NotificationStatus,
};

#[derive(Default)]
struct LeaveState {
    next_id: u64,
    requests: BTreeMap<u64, LeaveRequest>,
    balances: HashMap<(u64, LeaveType), LeaveBalance>,
}

/// Requests and balances share one lock so approval can flip the status and
/// decrement the balance atomically.
#[derive(Default)]
pub struct MemoryLeaveStore {
    state: Mutex<LeaveState>,
}

impl MemoryLeaveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryLeaveStore {
    async fn create_request(&self, request: NewLeaveRequest) -> Result<LeaveRequest> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let created = LeaveRequest {
            id: state.next_id,
            employee_id: request.employee_id,
            leave_type: request.leave_type,
            status: LeaveStatus::Pending,
            start_date: request.start_date,
            end_date: request.end_date,
            days_count: request.days_count,
            reason: request.reason,
            notes: None,
            approved_by: None,
            approval_date: None,
            salary_deduction: None,
            created_at: request.created_at,
            updated_at: request.created_at,
        };
        state.requests.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_request(&self, id: u64) -> Result<Option<LeaveRequest>> {
        Ok(self.state.lock().requests.get(&id).cloned())
    }

    async fn list_requests(&self, filter: &LeaveFilter) -> Result<LeavePage> {
        let (page, per_page) = filter.pagination();
        let state = self.state.lock();

        let mut matching: Vec<&LeaveRequest> = state
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(per_page as usize)
            .cloned()
            .collect();

        Ok(LeavePage {
            data,
            page,
            per_page,
            total,
        })
    }

    async fn approve_request(
        &self,
        id: u64,
        approval: &Approval,
        deduction: Option<&BalanceDeduction>,
    ) -> Result<ApprovalOutcome> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let Some(request) = state.requests.get_mut(&id).filter(|r| r.is_pending()) else {
            return Ok(ApprovalOutcome::NotPending);
        };

        if let Some(deduction) = deduction {
            let key = (deduction.employee_id, deduction.leave_type);
            match state.balances.get_mut(&key) {
                Some(balance) if balance.balance >= deduction.days => {
                    balance.balance -= deduction.days;
                    balance.updated_at = approval.approved_at;
                }
                _ => return Ok(ApprovalOutcome::InsufficientBalance),
            }
        }

        request.status = LeaveStatus::Approved;
        request.approved_by = Some(approval.approver_id);
        request.approval_date = Some(approval.approved_at);
        request.notes = approval.notes.clone();
        request.salary_deduction = approval.salary_deduction;
        request.updated_at = approval.approved_at;

        Ok(ApprovalOutcome::Approved(request.clone()))
    }

    async fn close_request(
        &self,
        id: u64,
        to: LeaveStatus,
        decision: &Decision,
    ) -> Result<Option<LeaveRequest>> {
        if !matches!(to, LeaveStatus::Rejected | LeaveStatus::Cancelled) {
            return Err(Error::validation(format!("cannot close a request as {to}")));
        }

        let mut state = self.state.lock();
        let Some(request) = state.requests.get_mut(&id).filter(|r| r.is_pending()) else {
            return Ok(None);
        };

        request.status = to;
        if decision.actor_id.is_some() {
            request.approved_by = decision.actor_id;
            request.approval_date = Some(decision.at);
        }
        if decision.notes.is_some() {
            request.notes = decision.notes.clone();
        }
        request.updated_at = decision.at;

        Ok(Some(request.clone()))
    }
}

#[async_trait]
impl BalanceStore for MemoryLeaveStore {
    async fn get_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
    ) -> Result<Option<LeaveBalance>> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&(employee_id, leave_type))
            .cloned())
    }

    async fn list_balances(&self, employee_id: u64) -> Result<Vec<LeaveBalance>> {
        let mut balances: Vec<LeaveBalance> = self
            .state
            .lock()
            .balances
            .values()
            .filter(|b| b.employee_id == employee_id)
            .cloned()
            .collect();
        balances.sort_by(|a, b| a.leave_type.as_str().cmp(b.leave_type.as_str()));
        Ok(balances)
    }

    async fn set_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        balance: u32,
        at: DateTime<Utc>,
    ) -> Result<LeaveBalance> {
        let row = LeaveBalance {
            employee_id,
            leave_type,
            balance,
            updated_at: at,
        };
        self.state
            .lock()
            .balances
            .insert((employee_id, leave_type), row.clone());
        Ok(row)
    }

    async fn adjust_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<LeaveBalance>> {
        let mut state = self.state.lock();
        let Some(row) = state.balances.get_mut(&(employee_id, leave_type)) else {
            return Ok(None);
        };

        let next = i64::from(row.balance) + delta;
        match u32::try_from(next) {
            Ok(next) => {
                row.balance = next;
                row.updated_at = at;
                Ok(Some(row.clone()))
            }
            Err(_) => Ok(None),
        }
    }
}

#[derive(Default)]
struct NotificationState {
    next_id: u64,
    rows: BTreeMap<u64, Notification>,
}

#[derive(Default)]
pub struct MemoryNotificationRepository {
    state: Mutex<NotificationState>,
}

impl MemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, oldest first.
    pub fn all(&self) -> Vec<Notification> {
        self.state.lock().rows.values().cloned().collect()
    }
}

#[async_trait]
impl NotificationRepository for MemoryNotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Notification> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let row = Notification {
            id: state.next_id,
            leave_request_id: notification.leave_request_id,
            recipient_email: notification.recipient_email,
            recipient_name: notification.recipient_name,
            event_type: notification.event_type,
            subject: notification.subject,
            body: notification.body,
            status: NotificationStatus::Pending,
            retry_count: 0,
            max_retries: notification.max_retries,
            error_message: None,
            sent_at: None,
            next_retry_at: None,
            claimed_at: None,
            created_at: notification.created_at,
            updated_at: notification.created_at,
        };
        state.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: u64) -> Result<Option<Notification>> {
        Ok(self.state.lock().rows.get(&id).cloned())
    }

    async fn claim(&self, id: u64, now: DateTime<Utc>) -> Result<Option<Notification>> {
        let mut state = self.state.lock();
        let Some(row) = state.rows.get_mut(&id).filter(|n| n.is_due(now)) else {
            return Ok(None);
        };
        row.status = NotificationStatus::Sending;
        row.claimed_at = Some(now);
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn mark_sent(
        &self,
        id: u64,
        claimed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(row) = state
            .rows
            .get_mut(&id)
            .filter(|n| n.is_held_by(claimed_at))
        else {
            return Ok(false);
        };
        row.status = NotificationStatus::Sent;
        row.sent_at = Some(at);
        row.error_message = None;
        row.next_retry_at = None;
        row.claimed_at = None;
        row.updated_at = at;
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: u64,
        claimed_at: DateTime<Utc>,
        failure: &AttemptFailure,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(row) = state
            .rows
            .get_mut(&id)
            .filter(|n| n.is_held_by(claimed_at))
        else {
            return Ok(false);
        };
        row.status = failure.status;
        row.retry_count = failure.retry_count;
        row.next_retry_at = failure.next_retry_at;
        row.error_message = Some(failure.error_message.clone());
        row.claimed_at = None;
        row.updated_at = failure.at;
        Ok(true)
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut released = 0;
        for row in self.state.lock().rows.values_mut() {
            if row.status == NotificationStatus::Sending
                && row.claimed_at.is_some_and(|at| at < claimed_before)
            {
                row.status = NotificationStatus::Retry;
                row.next_retry_at = Some(now);
                row.claimed_at = None;
                row.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Notification>> {
        Ok(self
            .state
            .lock()
            .rows
            .values()
            .filter(|n| n.is_due(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_by_status(
        &self,
        status: NotificationStatus,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        Ok(self
            .state
            .lock()
            .rows
            .values()
            .filter(|n| n.status == status)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryEmployeeDirectory {
    employees: Mutex<HashMap<u64, EmployeeProfile>>,
}

impl MemoryEmployeeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: EmployeeProfile) {
        self.employees.lock().insert(profile.id, profile);
    }
}

#[async_trait]
impl EmployeeDirectory for MemoryEmployeeDirectory {
    async fn get_employee(&self, employee_id: u64) -> Result<Option<EmployeeProfile>> {
        Ok(self.employees.lock().get(&employee_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn pending(employee_id: u64) -> NewLeaveRequest {
        NewLeaveRequest {
            employee_id,
            leave_type: LeaveType::Annual,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
            days_count: 3,
            reason: "family trip".to_string(),
            created_at: Utc::now(),
        }
    }

    fn approval() -> Approval {
        Approval {
            approver_id: 1,
            notes: None,
            approved_at: Utc::now(),
            salary_deduction: None,
        }
    }

    #[tokio::test]
    async fn failed_balance_guard_leaves_request_pending() {
        let store = MemoryLeaveStore::new();
        let request = store.create_request(pending(42)).await.unwrap();
        store
            .set_balance(42, LeaveType::Annual, 2, Utc::now())
            .await
            .unwrap();

        let deduction = BalanceDeduction {
            employee_id: 42,
            leave_type: LeaveType::Annual,
            days: 3,
        };
        let outcome = store
            .approve_request(request.id, &approval(), Some(&deduction))
            .await
            .unwrap();

        assert_eq!(outcome, ApprovalOutcome::InsufficientBalance);
        let stored = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeaveStatus::Pending);
        let balance = store.get_balance(42, LeaveType::Annual).await.unwrap();
        assert_eq!(balance.unwrap().balance, 2);
    }

    #[tokio::test]
    async fn missing_balance_row_fails_the_guard() {
        let store = MemoryLeaveStore::new();
        let request = store.create_request(pending(42)).await.unwrap();
        let deduction = BalanceDeduction {
            employee_id: 42,
            leave_type: LeaveType::Annual,
            days: 1,
        };
        let outcome = store
            .approve_request(request.id, &approval(), Some(&deduction))
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::InsufficientBalance);
    }

    #[tokio::test]
    async fn adjust_never_goes_below_zero() {
        let store = MemoryLeaveStore::new();
        store
            .set_balance(42, LeaveType::Sick, 4, Utc::now())
            .await
            .unwrap();

        assert!(
            store
                .adjust_balance(42, LeaveType::Sick, -5, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
        let row = store
            .adjust_balance(42, LeaveType::Sick, -4, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.balance, 0);
    }

    #[tokio::test]
    async fn list_filters_and_paginates_newest_first() {
        let store = MemoryLeaveStore::new();
        for employee_id in [1, 2, 1, 1] {
            store.create_request(pending(employee_id)).await.unwrap();
        }

        let filter = LeaveFilter {
            employee_id: Some(1),
            per_page: Some(2),
            ..Default::default()
        };
        let page = store.list_requests(&filter).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.data.len(), 2);
        assert!(page.data[0].id > page.data[1].id);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let repo = MemoryNotificationRepository::new();
        let now = Utc::now();
        let row = repo
            .create(NewNotification {
                leave_request_id: None,
                recipient_email: "a@example.com".to_string(),
                recipient_name: "A".to_string(),
                event_type: crate::model::NotificationEvent::LeaveSubmitted,
                subject: "s".to_string(),
                body: "b".to_string(),
                max_retries: 3,
                created_at: now,
            })
            .await
            .unwrap();

        assert!(repo.claim(row.id, now).await.unwrap().is_some());
        assert!(repo.claim(row.id, now).await.unwrap().is_none());
        assert!(repo.list_due(now, 10).await.unwrap().is_empty());

        let released = repo
            .release_stale_claims(now + chrono::Duration::seconds(1), now)
            .await
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(repo.list_due(now, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outcome_requires_the_current_claim() {
        let repo = MemoryNotificationRepository::new();
        let t0 = Utc::now();
        let row = repo
            .create(NewNotification {
                leave_request_id: Some(5),
                recipient_email: "b@example.com".to_string(),
                recipient_name: "B".to_string(),
                event_type: crate::model::NotificationEvent::LeaveApproved,
                subject: "s".to_string(),
                body: "b".to_string(),
                max_retries: 3,
                created_at: t0,
            })
            .await
            .unwrap();

        let first = repo.claim(row.id, t0).await.unwrap().unwrap();
        let later = t0 + chrono::Duration::seconds(400);
        let stale_before = later - chrono::Duration::seconds(300);
        repo.release_stale_claims(stale_before, later).await.unwrap();
        let second = repo.claim(row.id, later).await.unwrap().unwrap();

        let stale_failure = AttemptFailure {
            status: NotificationStatus::Retry,
            retry_count: 1,
            next_retry_at: Some(later + chrono::Duration::seconds(30)),
            error_message: "timed out".to_string(),
            at: later,
        };
        let first_token = first.claimed_at.unwrap();
        assert!(
            !repo
                .record_failure(row.id, first_token, &stale_failure)
                .await
                .unwrap()
        );
        assert!(!repo.mark_sent(row.id, first_token, later).await.unwrap());

        let current = repo.get(row.id).await.unwrap().unwrap();
        assert_eq!(current.status, NotificationStatus::Sending);
        assert_eq!(current.claimed_at, Some(later));
        assert_eq!(current.retry_count, 0);

        let second_token = second.claimed_at.unwrap();
        assert!(repo.mark_sent(row.id, second_token, later).await.unwrap());
        assert_eq!(
            repo.get(row.id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }
}
