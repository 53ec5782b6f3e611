use async_trait::async_trait;
use tracing::info;

use crate::error::DeliveryError;

/// Outbound transport. Implementations report any failure as an error; the
/// delivery worker decides whether to retry.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Writes messages to the log instead of a mail server.
#[derive(Debug, Default, Clone)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        info!(to, subject, body_len = body.len(), "Notification delivered to log");
        Ok(())
    }
}
