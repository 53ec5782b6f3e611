//! MySQL-backed stores. Guarded transitions are single conditional
//! `UPDATE`s; approval runs its status flip and balance decrement in one
//! transaction so a failed balance guard rolls the flip back.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, MySqlPool};

use super::{
    Approval, ApprovalOutcome, AttemptFailure, BalanceDeduction, BalanceStore, Decision,
    EmployeeDirectory, LeaveFilter, LeavePage, NotificationRepository, RequestStore,
};
use crate::error::{Error, Result};
use crate::model::{
    EmployeeProfile, LeaveBalance, LeaveRequest, LeaveStatus, LeaveType, NewLeaveRequest,
    NewNotification, Notification, NotificationStatus,
};

const LEAVE_COLUMNS: &str = "id, employee_id, leave_type, status, start_date, end_date, \
     days_count, reason, notes, approved_by, approval_date, salary_deduction, \
     created_at, updated_at";

const NOTIFICATION_COLUMNS: &str = "id, leave_request_id, recipient_email, recipient_name, \
     event_type, subject, body, status, retry_count, max_retries, error_message, sent_at, \
     next_retry_at, claimed_at, created_at, updated_at";

fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Database(format!("unexpected {column} value '{value}'")))
}

#[derive(FromRow)]
struct LeaveRequestRow {
    id: u64,
    employee_id: u64,
    leave_type: String,
    status: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    days_count: u32,
    reason: String,
    notes: Option<String>,
    approved_by: Option<u64>,
    approval_date: Option<DateTime<Utc>>,
    salary_deduction: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeaveRequestRow> for LeaveRequest {
    type Error = Error;

    fn try_from(row: LeaveRequestRow) -> Result<Self> {
        Ok(LeaveRequest {
            id: row.id,
            employee_id: row.employee_id,
            leave_type: parse_column("leave_type", &row.leave_type)?,
            status: parse_column("status", &row.status)?,
            start_date: row.start_date,
            end_date: row.end_date,
            days_count: row.days_count,
            reason: row.reason,
            notes: row.notes,
            approved_by: row.approved_by,
            approval_date: row.approval_date,
            salary_deduction: row.salary_deduction,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct LeaveBalanceRow {
    employee_id: u64,
    leave_type: String,
    balance: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeaveBalanceRow> for LeaveBalance {
    type Error = Error;

    fn try_from(row: LeaveBalanceRow) -> Result<Self> {
        Ok(LeaveBalance {
            employee_id: row.employee_id,
            leave_type: parse_column("leave_type", &row.leave_type)?,
            balance: u32::try_from(row.balance)
                .map_err(|_| Error::Database(format!("negative balance {}", row.balance)))?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: u64,
    leave_request_id: Option<u64>,
    recipient_email: String,
    recipient_name: String,
    event_type: String,
    subject: String,
    body: String,
    status: String,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.id,
            leave_request_id: row.leave_request_id,
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            event_type: parse_column("event_type", &row.event_type)?,
            subject: row.subject,
            body: row.body,
            status: parse_column("status", &row.status)?,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            error_message: row.error_message,
            sent_at: row.sent_at,
            next_retry_at: row.next_retry_at,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// Helper enum for typed SQLx binding
enum FilterValue {
    U64(u64),
    Str(&'static str),
}

/// `leave_requests` and `leave_balances`.
#[derive(Clone)]
pub struct MySqlLeaveStore {
    pool: MySqlPool,
}

impl MySqlLeaveStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestStore for MySqlLeaveStore {
    async fn create_request(&self, request: NewLeaveRequest) -> Result<LeaveRequest> {
        let result = sqlx::query(
            r#"
            INSERT INTO leave_requests
                (employee_id, leave_type, status, start_date, end_date, days_count, reason,
                 created_at, updated_at)
            VALUES (?, ?, 'pending', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.employee_id)
        .bind(request.leave_type.as_str())
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(request.days_count)
        .bind(&request.reason)
        .bind(request.created_at)
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;

        Ok(LeaveRequest {
            id: result.last_insert_id(),
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
        })
    }

    async fn get_request(&self, id: u64) -> Result<Option<LeaveRequest>> {
        let sql = format!("SELECT {LEAVE_COLUMNS} FROM leave_requests WHERE id = ?");
        sqlx::query_as::<_, LeaveRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(LeaveRequest::try_from)
            .transpose()
    }

    async fn list_requests(&self, filter: &LeaveFilter) -> Result<LeavePage> {
        let (page, per_page) = filter.pagination();

        let mut where_sql = String::from(" WHERE 1=1");
        let mut args: Vec<FilterValue> = Vec::new();

        if let Some(employee_id) = filter.employee_id {
            where_sql.push_str(" AND employee_id = ?");
            args.push(FilterValue::U64(employee_id));
        }

        if let Some(status) = filter.status {
            where_sql.push_str(" AND status = ?");
            args.push(FilterValue::Str(status.as_str()));
        }

        let count_sql = format!("SELECT COUNT(*) FROM leave_requests{where_sql}");
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
        for arg in &args {
            count_q = match arg {
                FilterValue::U64(v) => count_q.bind(*v),
                FilterValue::Str(s) => count_q.bind(*s),
            };
        }
        let total = count_q.fetch_one(&self.pool).await?;

        let data_sql = format!(
            "SELECT {LEAVE_COLUMNS} FROM leave_requests{where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut data_q = sqlx::query_as::<_, LeaveRequestRow>(&data_sql);
        for arg in args {
            data_q = match arg {
                FilterValue::U64(v) => data_q.bind(v),
                FilterValue::Str(s) => data_q.bind(s),
            };
        }
        let rows = data_q
            .bind(per_page)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(LeavePage {
            data: rows
                .into_iter()
                .map(LeaveRequest::try_from)
                .collect::<Result<_>>()?,
            page,
            per_page,
            total: total.max(0) as u64,
        })
    }

    async fn approve_request(
        &self,
        id: u64,
        approval: &Approval,
        deduction: Option<&BalanceDeduction>,
    ) -> Result<ApprovalOutcome> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"
            UPDATE leave_requests
            SET status = 'approved',
                approved_by = ?,
                approval_date = ?,
                notes = ?,
                salary_deduction = ?,
                updated_at = ?
            WHERE id = ?
            AND status = 'pending'
            "#,
        )
        .bind(approval.approver_id)
        .bind(approval.approved_at)
        .bind(approval.notes.as_deref())
        .bind(approval.salary_deduction)
        .bind(approval.approved_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ApprovalOutcome::NotPending);
        }

        if let Some(deduction) = deduction {
            let taken = sqlx::query(
                r#"
                UPDATE leave_balances
                SET balance = balance - ?,
                    updated_at = ?
                WHERE employee_id = ?
                AND leave_type = ?
                AND balance >= ?
                "#,
            )
            .bind(deduction.days)
            .bind(approval.approved_at)
            .bind(deduction.employee_id)
            .bind(deduction.leave_type.as_str())
            .bind(deduction.days)
            .execute(&mut *tx)
            .await?;

            if taken.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(ApprovalOutcome::InsufficientBalance);
            }
        }

        let sql = format!("SELECT {LEAVE_COLUMNS} FROM leave_requests WHERE id = ?");
        let row = sqlx::query_as::<_, LeaveRequestRow>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ApprovalOutcome::Approved(row.try_into()?))
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

        let result = match decision.actor_id {
            Some(actor_id) => {
                sqlx::query(
                    r#"
                    UPDATE leave_requests
                    SET status = ?,
                        approved_by = ?,
                        approval_date = ?,
                        notes = COALESCE(?, notes),
                        updated_at = ?
                    WHERE id = ?
                    AND status = 'pending'
                    "#,
                )
                .bind(to.as_str())
                .bind(actor_id)
                .bind(decision.at)
                .bind(decision.notes.as_deref())
                .bind(decision.at)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE leave_requests
                    SET status = ?,
                        notes = COALESCE(?, notes),
                        updated_at = ?
                    WHERE id = ?
                    AND status = 'pending'
                    "#,
                )
                .bind(to.as_str())
                .bind(decision.notes.as_deref())
                .bind(decision.at)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        // Terminal rows are never written again, so this read sees our update.
        self.get_request(id).await
    }
}

#[async_trait]
impl BalanceStore for MySqlLeaveStore {
    async fn get_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
    ) -> Result<Option<LeaveBalance>> {
        sqlx::query_as::<_, LeaveBalanceRow>(
            r#"
            SELECT employee_id, leave_type, balance, updated_at
            FROM leave_balances
            WHERE employee_id = ? AND leave_type = ?
            "#,
        )
        .bind(employee_id)
        .bind(leave_type.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(LeaveBalance::try_from)
        .transpose()
    }

    async fn list_balances(&self, employee_id: u64) -> Result<Vec<LeaveBalance>> {
        sqlx::query_as::<_, LeaveBalanceRow>(
            r#"
            SELECT employee_id, leave_type, balance, updated_at
            FROM leave_balances
            WHERE employee_id = ?
            ORDER BY leave_type
            "#,
        )
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LeaveBalance::try_from)
        .collect()
    }

    async fn set_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        balance: u32,
        at: DateTime<Utc>,
    ) -> Result<LeaveBalance> {
        sqlx::query(
            r#"
            INSERT INTO leave_balances (employee_id, leave_type, balance, updated_at)
            VALUES (?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE balance = VALUES(balance), updated_at = VALUES(updated_at)
            "#,
        )
        .bind(employee_id)
        .bind(leave_type.as_str())
        .bind(balance)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(LeaveBalance {
            employee_id,
            leave_type,
            balance,
            updated_at: at,
        })
    }

    async fn adjust_balance(
        &self,
        employee_id: u64,
        leave_type: LeaveType,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<LeaveBalance>> {
        let result = sqlx::query(
            r#"
            UPDATE leave_balances
            SET balance = balance + ?,
                updated_at = ?
            WHERE employee_id = ?
            AND leave_type = ?
            AND balance + ? >= 0
            "#,
        )
        .bind(delta)
        .bind(at)
        .bind(employee_id)
        .bind(leave_type.as_str())
        .bind(delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_balance(employee_id, leave_type).await
    }
}

/// `notifications`.
#[derive(Clone)]
pub struct MySqlNotificationRepository {
    pool: MySqlPool,
}

impl MySqlNotificationRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for MySqlNotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Notification> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications
                (leave_request_id, recipient_email, recipient_name, event_type, subject, body,
                 status, retry_count, max_retries, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(notification.leave_request_id)
        .bind(&notification.recipient_email)
        .bind(&notification.recipient_name)
        .bind(notification.event_type.as_str())
        .bind(&notification.subject)
        .bind(&notification.body)
        .bind(notification.max_retries)
        .bind(notification.created_at)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(Notification {
            id: result.last_insert_id(),
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
        })
    }

    async fn get(&self, id: u64) -> Result<Option<Notification>> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?");
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    async fn claim(&self, id: u64, now: DateTime<Utc>) -> Result<Option<Notification>> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sending',
                claimed_at = ?,
                updated_at = ?
            WHERE id = ?
            AND status IN ('pending', 'retry')
            AND retry_count < max_retries
            AND (next_retry_at IS NULL OR next_retry_at <= ?)
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn mark_sent(
        &self,
        id: u64,
        claimed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sent',
                sent_at = ?,
                error_message = NULL,
                next_retry_at = NULL,
                claimed_at = NULL,
                updated_at = ?
            WHERE id = ?
            AND status = 'sending'
            AND claimed_at = ?
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: u64,
        claimed_at: DateTime<Utc>,
        failure: &AttemptFailure,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = ?,
                retry_count = ?,
                next_retry_at = ?,
                error_message = ?,
                claimed_at = NULL,
                updated_at = ?
            WHERE id = ?
            AND status = 'sending'
            AND claimed_at = ?
            "#,
        )
        .bind(failure.status.as_str())
        .bind(failure.retry_count)
        .bind(failure.next_retry_at)
        .bind(&failure.error_message)
        .bind(failure.at)
        .bind(id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'retry',
                next_retry_at = ?,
                claimed_at = NULL,
                updated_at = ?
            WHERE status = 'sending'
            AND claimed_at < ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE status IN ('pending', 'retry') \
             AND retry_count < max_retries \
             AND (next_retry_at IS NULL OR next_retry_at <= ?) \
             ORDER BY id LIMIT ?"
        );
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    async fn list_by_status(
        &self,
        status: NotificationStatus,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE status = ? \
             ORDER BY id LIMIT ?"
        );
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }
}

#[derive(FromRow)]
struct EmployeeRow {
    id: u64,
    name: String,
    email: String,
    gender: String,
    marital_status: String,
}

/// Reads eligibility and addressing fields from the `employees` table.
#[derive(Clone)]
pub struct MySqlEmployeeDirectory {
    pool: MySqlPool,
}

impl MySqlEmployeeDirectory {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmployeeDirectory for MySqlEmployeeDirectory {
    async fn get_employee(&self, employee_id: u64) -> Result<Option<EmployeeProfile>> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT
                id,
                CONCAT_WS(' ', first_name, last_name) AS name,
                email,
                gender,
                marital_status
            FROM employees
            WHERE id = ?
            "#,
        )
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(EmployeeProfile {
                id: row.id,
                name: row.name,
                email: row.email,
                gender: parse_column("gender", &row.gender)?,
                marital_status: parse_column("marital_status", &row.marital_status)?,
            })
        })
        .transpose()
    }
}
