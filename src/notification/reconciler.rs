//! Periodic pass that re-enqueues due notifications.
//!
//! Covers rows whose task was dropped (full or stopped queue, restart),
//! rows waiting out a retry backoff, and claims abandoned by a worker that
//! died mid-send.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::DeliveryQueue;
use crate::clock::Clock;
use crate::error::DeliveryError;
use crate::model::NotificationTask;
use crate::store::NotificationRepository;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// A `Sending` row older than this is assumed abandoned.
    pub claim_ttl: Duration,
    pub batch_size: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            claim_ttl: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

pub struct Reconciler {
    repo: Arc<dyn NotificationRepository>,
    queue: Arc<DeliveryQueue>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        queue: Arc<DeliveryQueue>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            repo,
            queue,
            clock,
            config,
            task: Mutex::new(None),
        }
    }

    /// One sweep. Returns how many tasks were enqueued.
    pub async fn reconcile_once(&self) -> Result<usize, DeliveryError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.claim_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let released = self.repo.release_stale_claims(now - ttl, now).await?;
        if released > 0 {
            warn!(released, "Released stale delivery claims");
        }

        let due = self.repo.list_due(now, self.config.batch_size).await?;
        let mut enqueued = 0;
        for notification in &due {
            match self.queue.enqueue(NotificationTask {
                notification_id: notification.id,
            }) {
                Ok(true) => enqueued += 1,
                Ok(false) => {}
                Err(e @ (DeliveryError::QueueFull | DeliveryError::QueueClosed)) => {
                    debug!(error = %e, "Queue not accepting, stopping sweep early");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if enqueued > 0 {
            debug!(enqueued, due = due.len(), "Reconciliation sweep enqueued tasks");
        }
        Ok(enqueued)
    }

    /// Spawns the timer loop. The first sweep runs immediately. Calling
    /// `start` on a running reconciler does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.reconcile_once().await {
                            warn!(error = %e, "Reconciliation sweep failed");
                        }
                    }
                }
            }
            debug!("Reconciler loop exited");
        });

        *task = Some((token, handle));
        info!(interval = ?self.config.interval, "Reconciler started");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Cancels the timer loop and waits for an in-progress sweep to finish.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.task.lock().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
        info!("Reconciler stopped");
    }
}
