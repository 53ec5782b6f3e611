//! Leave request lifecycle.
//!
//! `Pending` is the only state a request leaves, and it leaves it exactly
//! once. Every transition is a single guarded store operation; the reads
//! done beforehand only pick the error to report, they never decide whether
//! a write happens.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use super::calendar::working_days;
use super::policy::LeavePolicy;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{
    EmployeeProfile, LeaveBalance, LeaveRequest, LeaveStatus, LeaveType, NewLeaveRequest,
    NotificationEvent,
};
use crate::notification::Notifier;
use crate::store::{
    Approval, ApprovalOutcome, BalanceDeduction, BalanceStore, Decision, EmployeeDirectory,
    LeaveFilter, LeavePage, RequestStore,
};

const NOT_PENDING: &str = "only pending requests may be modified";

pub struct LifecycleEngine {
    requests: Arc<dyn RequestStore>,
    balances: Arc<dyn BalanceStore>,
    directory: Arc<dyn EmployeeDirectory>,
    notifier: Notifier,
    policy: LeavePolicy,
    clock: Arc<dyn Clock>,
}

impl LifecycleEngine {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        balances: Arc<dyn BalanceStore>,
        directory: Arc<dyn EmployeeDirectory>,
        notifier: Notifier,
        policy: LeavePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests,
            balances,
            directory,
            notifier,
            policy,
            clock,
        }
    }

    /// Files a Pending request. Balance is not checked or touched here.
    pub async fn apply(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> Result<LeaveRequest> {
        if start_date > end_date {
            return Err(Error::validation("start_date cannot be after end_date"));
        }
        if start_date < self.clock.today() {
            return Err(Error::validation("start_date cannot be in the past"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("reason is required"));
        }

        let employee = self.employee(employee_id).await?;
        self.policy.check_eligibility(leave_type, &employee)?;

        let days_count = working_days(start_date, end_date);
        if days_count == 0 {
            return Err(Error::validation("leave period contains no working days"));
        }

        let now = self.clock.now();
        let request = self
            .requests
            .create_request(NewLeaveRequest {
                employee_id,
                leave_type,
                start_date,
                end_date,
                days_count,
                reason: reason.to_string(),
                created_at: now,
            })
            .await?;

        info!(
            leave_id = request.id,
            employee_id,
            leave_type = %leave_type,
            days_count,
            "Leave request submitted"
        );
        self.emit(NotificationEvent::LeaveSubmitted, &request, &employee).await;
        Ok(request)
    }

    /// Pending→Approved. For balance-managed types the balance is decremented
    /// in the same guarded step; when it does not cover `days_count` the
    /// request stays Pending and a validation error is returned.
    pub async fn approve(
        &self,
        request_id: u64,
        approver_id: u64,
        notes: Option<&str>,
    ) -> Result<LeaveRequest> {
        let request = self.pending_request(request_id).await?;
        let employee = self.employee(request.employee_id).await?;

        let deduction = self
            .policy
            .is_balance_managed(request.leave_type)
            .then_some(BalanceDeduction {
                employee_id: request.employee_id,
                leave_type: request.leave_type,
                days: request.days_count,
            });
        let approval = Approval {
            approver_id,
            notes: normalize_notes(notes),
            approved_at: self.clock.now(),
            salary_deduction: self
                .policy
                .salary_deduction(request.leave_type, request.days_count),
        };

        let approved = match self
            .requests
            .approve_request(request_id, &approval, deduction.as_ref())
            .await?
        {
            ApprovalOutcome::Approved(approved) => approved,
            ApprovalOutcome::NotPending => {
                warn!(
                    leave_id = request_id,
                    approver_id,
                    "Approval lost to a concurrent transition"
                );
                return Err(Error::conflict(NOT_PENDING));
            }
            ApprovalOutcome::InsufficientBalance => {
                warn!(
                    leave_id = request_id,
                    employee_id = request.employee_id,
                    leave_type = %request.leave_type,
                    days_count = request.days_count,
                    "Approval blocked by insufficient balance"
                );
                return Err(Error::validation(format!(
                    "insufficient {} leave balance for {} day(s)",
                    request.leave_type, request.days_count
                )));
            }
        };

        info!(
            leave_id = request_id,
            approver_id,
            salary_deduction = ?approved.salary_deduction,
            "Leave approved"
        );
        self.emit(NotificationEvent::LeaveApproved, &approved, &employee).await;
        Ok(approved)
    }

    pub async fn reject(
        &self,
        request_id: u64,
        approver_id: u64,
        reason: Option<&str>,
    ) -> Result<LeaveRequest> {
        let request = self.pending_request(request_id).await?;
        let employee = self.employee(request.employee_id).await?;

        let decision = Decision {
            actor_id: Some(approver_id),
            notes: normalize_notes(reason),
            at: self.clock.now(),
        };
        let rejected = self
            .requests
            .close_request(request_id, LeaveStatus::Rejected, &decision)
            .await?
            .ok_or_else(|| Error::conflict(NOT_PENDING))?;

        info!(leave_id = request_id, approver_id, "Leave rejected");
        self.emit(NotificationEvent::LeaveRejected, &rejected, &employee).await;
        Ok(rejected)
    }

    /// Only the employee who filed the request may cancel it.
    pub async fn cancel(&self, request_id: u64, employee_id: u64) -> Result<LeaveRequest> {
        let request = self.request(request_id).await?;
        if request.employee_id != employee_id {
            return Err(Error::forbidden("only the requesting employee may cancel"));
        }
        if !request.is_pending() {
            return Err(Error::conflict(NOT_PENDING));
        }
        let employee = self.employee(employee_id).await?;

        let decision = Decision {
            actor_id: None,
            notes: None,
            at: self.clock.now(),
        };
        let cancelled = self
            .requests
            .close_request(request_id, LeaveStatus::Cancelled, &decision)
            .await?
            .ok_or_else(|| Error::conflict(NOT_PENDING))?;

        info!(leave_id = request_id, employee_id, "Leave cancelled");
        self.emit(NotificationEvent::LeaveCancelled, &cancelled, &employee).await;
        Ok(cancelled)
    }

    pub async fn get(&self, request_id: u64) -> Result<LeaveRequest> {
        self.request(request_id).await
    }

    pub async fn list(&self, filter: &LeaveFilter) -> Result<LeavePage> {
        self.requests.list_requests(filter).await
    }

    pub async fn balance(&self, employee_id: u64, leave_type: LeaveType) -> Result<LeaveBalance> {
        self.balances
            .get_balance(employee_id, leave_type)
            .await?
            .ok_or_else(|| Error::not_found("LeaveBalance", format!("{employee_id}/{leave_type}")))
    }

    pub async fn balances(&self, employee_id: u64) -> Result<Vec<LeaveBalance>> {
        self.balances.list_balances(employee_id).await
    }

    /// Administrative upsert of a balance.
    pub async fn set_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        balance: u32,
    ) -> Result<LeaveBalance> {
        let row = self
            .balances
            .set_balance(employee_id, leave_type, balance, self.clock.now())
            .await?;
        info!(employee_id, leave_type = %leave_type, balance, "Leave balance set");
        Ok(row)
    }

    /// Administrative correction; refuses to take the balance below zero.
    pub async fn adjust_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        delta: i64,
    ) -> Result<LeaveBalance> {
        if let Some(row) = self
            .balances
            .adjust_balance(employee_id, leave_type, delta, self.clock.now())
            .await?
        {
            info!(
                employee_id,
                leave_type = %leave_type,
                delta,
                balance = row.balance,
                "Leave balance adjusted"
            );
            return Ok(row);
        }

        match self.balances.get_balance(employee_id, leave_type).await? {
            Some(current) => Err(Error::validation(format!(
                "adjustment of {delta} would make the {leave_type} balance negative (current {})",
                current.balance
            ))),
            None => Err(Error::not_found(
                "LeaveBalance",
                format!("{employee_id}/{leave_type}"),
            )),
        }
    }

    async fn request(&self, request_id: u64) -> Result<LeaveRequest> {
        self.requests
            .get_request(request_id)
            .await?
            .ok_or_else(|| Error::not_found("LeaveRequest", request_id))
    }

    async fn pending_request(&self, request_id: u64) -> Result<LeaveRequest> {
        let request = self.request(request_id).await?;
        if !request.is_pending() {
            return Err(Error::conflict(NOT_PENDING));
        }
        Ok(request)
    }

    async fn employee(&self, employee_id: u64) -> Result<EmployeeProfile> {
        self.directory
            .get_employee(employee_id)
            .await?
            .ok_or_else(|| Error::not_found("Employee", employee_id))
    }

    async fn emit(
        &self,
        event: NotificationEvent,
        request: &LeaveRequest,
        employee: &EmployeeProfile,
    ) {
        let is_paid = self.policy.is_salary_deducting(request.leave_type);
        self.notifier
            .notify(event, request, employee, is_paid, self.clock.now())
            .await;
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
