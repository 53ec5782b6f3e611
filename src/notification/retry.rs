//! Backoff and terminal-failure policy for failed send attempts.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::NotificationStatus;
use crate::store::AttemptFailure;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    Exhausted {
        retry_count: u32,
    },
}

impl RetryPolicy {
    /// Delay before the attempt following the `retry_count`-th failure:
    /// `base * 2^(retry_count - 1)`, capped at `max_delay`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// `retry_count` is the count before this failure.
    pub fn on_failure(
        &self,
        retry_count: u32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let retry_count = retry_count.saturating_add(1);
        if retry_count >= max_retries {
            return RetryDecision::Exhausted { retry_count };
        }

        let delay = chrono::Duration::from_std(self.backoff(retry_count))
            .unwrap_or_else(|_| chrono::Duration::MAX);
        RetryDecision::Retry {
            retry_count,
            next_retry_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Row update for a failed attempt.
    pub fn failure_update(
        &self,
        retry_count: u32,
        max_retries: u32,
        error_message: String,
        now: DateTime<Utc>,
    ) -> AttemptFailure {
        match self.on_failure(retry_count, max_retries, now) {
            RetryDecision::Retry {
                retry_count,
                next_retry_at,
            } => AttemptFailure {
                status: NotificationStatus::Retry,
                retry_count,
                next_retry_at: Some(next_retry_at),
                error_message,
                at: now,
            },
            RetryDecision::Exhausted { retry_count } => AttemptFailure {
                status: NotificationStatus::Failed,
                retry_count,
                next_retry_at: None,
                error_message,
                at: now,
            },
        }
    }
}
