//! Post-transition hook: render, persist as Pending, then enqueue.
//!
//! Failures here are logged and swallowed. A committed leave transition is
//! never undone because its notification could not be scheduled.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::composer::{MessageFields, compose};
use super::queue::DeliveryQueue;
use crate::model::{
    EmployeeProfile, LeaveRequest, NewNotification, Notification, NotificationEvent,
    NotificationTask,
};
use crate::store::NotificationRepository;

/// Every row gets at least one delivery attempt; a `max_retries` of zero is
/// raised to one.
pub struct Notifier {
    repo: Arc<dyn NotificationRepository>,
    queue: Arc<DeliveryQueue>,
    max_retries: u32,
}

impl Notifier {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        queue: Arc<DeliveryQueue>,
        max_retries: u32,
    ) -> Self {
        Self {
            repo,
            queue,
            max_retries: max_retries.max(1),
        }
    }

    /// Returns the persisted row, or `None` if it could not be stored.
    pub async fn notify(
        &self,
        event: NotificationEvent,
        request: &LeaveRequest,
        employee: &EmployeeProfile,
        is_paid_leave: bool,
        now: DateTime<Utc>,
    ) -> Option<Notification> {
        let message = compose(
            event,
            request.leave_type,
            is_paid_leave,
            &MessageFields {
                employee_name: &employee.name,
                start_date: request.start_date,
                end_date: request.end_date,
                days_count: request.days_count,
                reason: &request.reason,
                notes: request.notes.as_deref(),
                salary_deduction: request.salary_deduction,
            },
        );

        let notification = match self
            .repo
            .create(NewNotification {
                leave_request_id: Some(request.id),
                recipient_email: employee.email.clone(),
                recipient_name: employee.name.clone(),
                event_type: event,
                subject: message.subject,
                body: message.body,
                max_retries: self.max_retries,
                created_at: now,
            })
            .await
        {
            Ok(notification) => notification,
            Err(e) => {
                error!(
                    error = %e,
                    leave_id = request.id,
                    event = %event,
                    "Failed to persist notification"
                );
                return None;
            }
        };

        match self.queue.enqueue(NotificationTask {
            notification_id: notification.id,
        }) {
            Ok(_) => debug!(
                notification_id = notification.id,
                event = %event,
                "Notification enqueued"
            ),
            Err(e) => warn!(
                error = %e,
                notification_id = notification.id,
                "Notification not enqueued, left for reconciliation"
            ),
        }

        Some(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Gender, LeaveStatus, LeaveType, MaritalStatus, NotificationStatus};
    use crate::notification::queue::Dispatcher;
    use crate::notification::retry::RetryPolicy;
    use crate::notification::sender::LogSender;
    use crate::store::MemoryNotificationRepository;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn submitted(now: DateTime<Utc>) -> LeaveRequest {
        LeaveRequest {
            id: 9,
            employee_id: 4,
            leave_type: LeaveType::Casual,
            status: LeaveStatus::Pending,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            days_count: 1,
            reason: "dentist".to_string(),
            notes: None,
            approved_by: None,
            approval_date: None,
            salary_deduction: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn zero_max_retries_still_gets_an_attempt() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let repo = Arc::new(MemoryNotificationRepository::new());
        let queue = Arc::new(DeliveryQueue::new(
            Dispatcher::new(
                repo.clone(),
                Arc::new(LogSender),
                RetryPolicy::default(),
                clock,
                Duration::from_secs(5),
            ),
            8,
        ));
        let notifier = Notifier::new(repo.clone(), queue.clone(), 0);
        let employee = EmployeeProfile {
            id: 4,
            name: "Kofi Mensah".to_string(),
            email: "kofi@example.com".to_string(),
            gender: Gender::Male,
            marital_status: MaritalStatus::Married,
        };

        queue.start(1).unwrap();
        let row = notifier
            .notify(
                NotificationEvent::LeaveSubmitted,
                &submitted(now),
                &employee,
                false,
                now,
            )
            .await
            .unwrap();
        assert_eq!(row.max_retries, 1);
        assert!(row.is_due(now));

        queue.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            repo.get(row.id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }
}
