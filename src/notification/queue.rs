//! In-memory delivery queue and worker pool.
//!
//! The queue only carries notification ids. Rows are persisted before they
//! are enqueued, so anything lost here (full queue, shutdown, crash) is
//! picked up again by the reconciler.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use super::sender::Sender;
use crate::clock::Clock;
use crate::error::DeliveryError;
use crate::model::{NotificationStatus, NotificationTask};
use crate::store::NotificationRepository;

/// What happened to a task after one pass through a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Another worker holds the row, it is no longer due, or the claim was
    /// released before a failure could be recorded.
    Skipped,
    Retrying { next_retry_at: DateTime<Utc> },
}

/// Performs one delivery attempt: claim, send, record.
pub struct Dispatcher {
    repo: Arc<dyn NotificationRepository>,
    sender: Arc<dyn Sender>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        sender: Arc<dyn Sender>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            sender,
            retry,
            clock,
            send_timeout,
        }
    }

    /// Returns `Err(Permanent)` when this attempt exhausted the retries.
    pub async fn deliver(&self, task: NotificationTask) -> Result<DeliveryOutcome, DeliveryError> {
        let id = task.notification_id;
        let Some(notification) = self.repo.claim(id, self.clock.now()).await? else {
            debug!(notification_id = id, "Notification not claimable, skipping");
            return Ok(DeliveryOutcome::Skipped);
        };
        let Some(claimed_at) = notification.claimed_at else {
            warn!(notification_id = id, "Claimed row carries no claim time, skipping");
            return Ok(DeliveryOutcome::Skipped);
        };

        let attempt = tokio::time::timeout(
            self.send_timeout,
            self.sender.send(
                &notification.recipient_email,
                &notification.subject,
                &notification.body,
            ),
        )
        .await
        .unwrap_or(Err(DeliveryError::Timeout(self.send_timeout)));

        let now = self.clock.now();
        let error = match attempt {
            Ok(()) => {
                if !self.repo.mark_sent(id, claimed_at, now).await? {
                    warn!(notification_id = id, "Claim lost before recording sent status");
                }
                debug!(
                    notification_id = id,
                    to = %notification.recipient_email,
                    "Notification sent"
                );
                return Ok(DeliveryOutcome::Sent);
            }
            Err(e) => e,
        };

        let failure = self.retry.failure_update(
            notification.retry_count,
            notification.max_retries,
            error.to_string(),
            now,
        );
        if !self.repo.record_failure(id, claimed_at, &failure).await? {
            warn!(
                notification_id = id,
                error = %error,
                "Claim lost before recording failure, outcome discarded"
            );
            return Ok(DeliveryOutcome::Skipped);
        }

        match (failure.status, failure.next_retry_at) {
            (NotificationStatus::Retry, Some(next_retry_at)) => {
                warn!(
                    notification_id = id,
                    attempt = failure.retry_count,
                    error = %error,
                    %next_retry_at,
                    "Notification send failed, retry scheduled"
                );
                Ok(DeliveryOutcome::Retrying { next_retry_at })
            }
            _ => Err(DeliveryError::Permanent {
                attempts: failure.retry_count,
                message: failure.error_message,
            }),
        }
    }
}

struct Running {
    tx: mpsc::Sender<NotificationTask>,
    workers: Vec<JoinHandle<()>>,
}

/// Bounded task queue drained by a pool of workers.
pub struct DeliveryQueue {
    dispatcher: Arc<Dispatcher>,
    capacity: usize,
    running: Mutex<Option<Running>>,
    /// Ids waiting in the channel. A worker removes an id when it takes it.
    queued: Arc<Mutex<HashSet<u64>>>,
    in_flight: Arc<AtomicUsize>,
}

impl DeliveryQueue {
    pub fn new(dispatcher: Dispatcher, capacity: usize) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            capacity: capacity.max(1),
            running: Mutex::new(None),
            queued: Arc::new(Mutex::new(HashSet::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn start(&self, worker_count: usize) -> Result<(), DeliveryError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(DeliveryError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let worker_count = worker_count.max(1);

        let workers = (0..worker_count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    self.dispatcher.clone(),
                    rx.clone(),
                    self.queued.clone(),
                    self.in_flight.clone(),
                ))
            })
            .collect();

        *running = Some(Running { tx, workers });
        info!(workers = worker_count, capacity = self.capacity, "Delivery queue started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Tasks accepted but not yet picked up, plus sends in progress.
    pub fn pending(&self) -> usize {
        self.queued.lock().len() + self.in_flight.load(Ordering::SeqCst)
    }

    /// Never waits: a stopped or full queue is reported as an error.
    /// Returns `false` when the id is already waiting in the channel.
    pub fn enqueue(&self, task: NotificationTask) -> Result<bool, DeliveryError> {
        let running = self.running.lock();
        let Some(running) = running.as_ref() else {
            return Err(DeliveryError::QueueClosed);
        };

        // Record before handing over so a fast worker never removes first.
        if !self.queued.lock().insert(task.notification_id) {
            return Ok(false);
        }
        running.tx.try_send(task).map(|()| true).map_err(|e| {
            self.queued.lock().remove(&task.notification_id);
            match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::QueueClosed,
            }
        })
    }

    /// Stops accepting tasks and lets the workers drain what is queued.
    /// Workers still busy when `grace` runs out are aborted and the number
    /// of undrained tasks is reported.
    pub async fn stop(&self, grace: Duration) -> Result<(), DeliveryError> {
        let Some(Running { tx, mut workers }) = self.running.lock().take() else {
            return Ok(());
        };
        drop(tx);
        info!(pending = self.pending(), "Delivery queue stopping");

        let drained =
            tokio::time::timeout(grace, futures::future::join_all(workers.iter_mut())).await;

        match drained {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Delivery worker panicked");
                    }
                }
                info!("Delivery queue stopped");
                Ok(())
            }
            Err(_) => {
                for worker in &workers {
                    worker.abort();
                }
                let undrained = self.pending();
                self.queued.lock().clear();
                self.in_flight.store(0, Ordering::SeqCst);
                warn!(undrained, ?grace, "Delivery queue stop timed out");
                Err(DeliveryError::ShutdownTimeout { undrained })
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    dispatcher: Arc<Dispatcher>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<NotificationTask>>>,
    queued: Arc<Mutex<HashSet<u64>>>,
    in_flight: Arc<AtomicUsize>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        in_flight.fetch_add(1, Ordering::SeqCst);
        queued.lock().remove(&task.notification_id);

        match dispatcher.deliver(task).await {
            Ok(outcome) => debug!(
                worker,
                notification_id = task.notification_id,
                ?outcome,
                "Task done"
            ),
            Err(e @ DeliveryError::Permanent { .. }) => {
                error!(
                    worker,
                    notification_id = task.notification_id,
                    error = %e,
                    "Notification failed permanently"
                )
            }
            Err(e) => {
                warn!(
                    worker,
                    notification_id = task.notification_id,
                    error = %e,
                    "Delivery attempt errored"
                )
            }
        }

        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker, "Delivery worker exited");
}
