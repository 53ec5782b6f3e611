use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;

use crate::notification::{ReconcilerConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub db_max_connections: u32,

    /// Salary deducted per approved working day of a paid leave type.
    pub leave_daily_rate: f64,

    // Delivery
    pub delivery_workers: usize,
    pub delivery_queue_capacity: usize,
    pub delivery_max_retries: u32,
    pub delivery_retry_base: Duration,
    pub delivery_retry_max: Duration,
    pub delivery_send_timeout: Duration,
    pub delivery_reconcile_interval: Duration,
    pub delivery_claim_ttl: Duration,
    pub delivery_shutdown_grace: Duration,

    pub employee_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let config = Self {
            server_addr: env::var("SERVER_ADDR").context("SERVER_ADDR must be set")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,

            leave_daily_rate: env_or("LEAVE_DAILY_RATE", 0.0)?,

            delivery_workers: env_or("DELIVERY_WORKERS", 4)?,
            delivery_queue_capacity: env_or("DELIVERY_QUEUE_CAPACITY", 1024)?,
            delivery_max_retries: env_or("DELIVERY_MAX_RETRIES", 3)?,
            delivery_retry_base: secs("DELIVERY_RETRY_BASE_SECS", 30)?,
            delivery_retry_max: secs("DELIVERY_RETRY_MAX_SECS", 1800)?,
            delivery_send_timeout: secs("DELIVERY_SEND_TIMEOUT_SECS", 30)?,
            delivery_reconcile_interval: secs("DELIVERY_RECONCILE_SECS", 15)?,
            delivery_claim_ttl: secs("DELIVERY_CLAIM_TTL_SECS", 300)?,
            delivery_shutdown_grace: secs("DELIVERY_SHUTDOWN_GRACE_SECS", 10)?,

            employee_cache_ttl: secs("EMPLOYEE_CACHE_TTL_SECS", 600)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings under which a notification could never be attempted,
    /// or a live claim could be released while its send is still running.
    pub fn validate(&self) -> Result<()> {
        if self.delivery_max_retries == 0 {
            bail!("DELIVERY_MAX_RETRIES must be at least 1");
        }
        if self.delivery_workers == 0 {
            bail!("DELIVERY_WORKERS must be at least 1");
        }
        if self.delivery_claim_ttl <= self.delivery_send_timeout {
            bail!(
                "DELIVERY_CLAIM_TTL_SECS ({}) must exceed DELIVERY_SEND_TIMEOUT_SECS ({})",
                self.delivery_claim_ttl.as_secs(),
                self.delivery_send_timeout.as_secs()
            );
        }
        if self.delivery_retry_base > self.delivery_retry_max {
            bail!("DELIVERY_RETRY_BASE_SECS must not exceed DELIVERY_RETRY_MAX_SECS");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.delivery_retry_base,
            max_delay: self.delivery_retry_max,
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: self.delivery_reconcile_interval,
            claim_ttl: self.delivery_claim_ttl,
            ..ReconcilerConfig::default()
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn secs(key: &str, default: u64) -> Result<Duration> {
    env_or(key, default).map(Duration::from_secs)
}
