use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use parking_lot::Mutex;

use hrm_leave::DeliveryError;
use hrm_leave::clock::{Clock, TokioClock};
use hrm_leave::leave::{LeavePolicy, LifecycleEngine};
use hrm_leave::model::{
    EmployeeProfile, Gender, LeaveStatus, LeaveType, MaritalStatus, NotificationEvent,
    NotificationStatus,
};
use hrm_leave::notification::{
    DeliveryQueue, Dispatcher, Notifier, Reconciler, ReconcilerConfig, RetryPolicy, Sender,
};
use hrm_leave::store::{
    MemoryEmployeeDirectory, MemoryLeaveStore, MemoryNotificationRepository,
    NotificationRepository,
};

const MAX_RETRIES: u32 = 3;
const EMPLOYEE: u64 = 21;

struct AlwaysFailing {
    attempts: AtomicU32,
}

#[async_trait]
impl Sender for AlwaysFailing {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::transient("connection refused"))
    }
}

#[derive(Default)]
struct Recording {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Sender for Recording {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), DeliveryError> {
        self.sent.lock().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

struct Service {
    engine: LifecycleEngine,
    notifications: Arc<MemoryNotificationRepository>,
    queue: Arc<DeliveryQueue>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
}

impl Service {
    fn start(sender: Arc<dyn Sender>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let store = Arc::new(MemoryLeaveStore::new());
        let notifications = Arc::new(MemoryNotificationRepository::new());
        let directory = Arc::new(MemoryEmployeeDirectory::new());
        directory.insert(EmployeeProfile {
            id: EMPLOYEE,
            name: "Priya Nair".to_string(),
            email: "priya@example.com".to_string(),
            gender: Gender::Female,
            marital_status: MaritalStatus::Single,
        });

        let queue = Arc::new(DeliveryQueue::new(
            Dispatcher::new(
                notifications.clone(),
                sender,
                RetryPolicy {
                    base_delay: Duration::from_secs(10),
                    max_delay: Duration::from_secs(60),
                },
                clock.clone(),
                Duration::from_secs(5),
            ),
            64,
        ));
        queue.start(2).unwrap();

        let reconciler = Arc::new(Reconciler::new(
            notifications.clone(),
            queue.clone(),
            clock.clone(),
            ReconcilerConfig {
                interval: Duration::from_secs(2),
                claim_ttl: Duration::from_secs(120),
                batch_size: 50,
            },
        ));
        reconciler.start();

        let engine = LifecycleEngine::new(
            store.clone(),
            store,
            directory,
            Notifier::new(notifications.clone(), queue.clone(), MAX_RETRIES),
            LeavePolicy::new(200.0),
            clock.clone(),
        );

        Self {
            engine,
            notifications,
            queue,
            reconciler,
            clock,
        }
    }

    async fn shutdown(&self) {
        self.reconciler.stop().await;
        self.queue.stop(Duration::from_secs(5)).await.unwrap();
    }

    fn next_monday(&self) -> NaiveDate {
        let mut day = self.clock.today().succ_opt().unwrap();
        while day.weekday() != Weekday::Mon {
            day = day.succ_opt().unwrap();
        }
        day
    }
}

#[tokio::test(start_paused = true)]
async fn failing_sender_ends_in_failed_after_max_retries() {
    let sender = Arc::new(AlwaysFailing {
        attempts: AtomicU32::new(0),
    });
    let service = Service::start(sender.clone());

    let monday = service.next_monday();
    let request = service
        .engine
        .apply(
            EMPLOYEE,
            LeaveType::Casual,
            monday,
            monday + chrono::Duration::days(2),
            "moving house",
        )
        .await
        .unwrap();
    assert_eq!(request.status, LeaveStatus::Pending);

    // Attempts at t=0, t≈10s and t≈30s, then the row is terminal.
    tokio::time::sleep(Duration::from_secs(120)).await;

    let rows = service.notifications.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, NotificationStatus::Failed);
    assert_eq!(rows[0].retry_count, MAX_RETRIES);
    assert_eq!(
        rows[0].error_message.as_deref(),
        Some("transient delivery failure: connection refused")
    );
    assert_eq!(sender.attempts.load(Ordering::SeqCst), MAX_RETRIES);
    assert!(
        service
            .notifications
            .list_due(service.clock.now(), 10)
            .await
            .unwrap()
            .is_empty()
    );

    // Failed rows stay failed.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(sender.attempts.load(Ordering::SeqCst), MAX_RETRIES);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_are_delivered() {
    let sender = Arc::new(Recording::default());
    let service = Service::start(sender.clone());

    service
        .engine
        .set_balance(EMPLOYEE, LeaveType::Annual, 12)
        .await
        .unwrap();
    let monday = service.next_monday();
    let request = service
        .engine
        .apply(
            EMPLOYEE,
            LeaveType::Annual,
            monday,
            monday + chrono::Duration::days(4),
            "vacation",
        )
        .await
        .unwrap();
    let approved = service
        .engine
        .approve(request.id, 1, Some("approved by team lead"))
        .await
        .unwrap();

    assert_eq!(approved.salary_deduction, Some(1000.0));
    assert_eq!(
        service
            .engine
            .balance(EMPLOYEE, LeaveType::Annual)
            .await
            .unwrap()
            .balance,
        7
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    service.shutdown().await;

    let rows = service.notifications.all();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|n| n.status == NotificationStatus::Sent));
    assert_eq!(
        rows.iter().map(|n| n.event_type).collect::<Vec<_>>(),
        vec![
            NotificationEvent::LeaveSubmitted,
            NotificationEvent::LeaveApproved
        ]
    );

    let sent = sender.sent.lock();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(to, _)| to == "priya@example.com"));
    assert!(sent.iter().any(|(_, subject)| subject.starts_with("Leave approved: Annual leave")));
}
