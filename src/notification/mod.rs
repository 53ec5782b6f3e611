//! Notification composition and at-least-once delivery.
//!
//! Rows are written by [`Notifier`] after a leave transition commits, then
//! moved through `Pending → Sending → Sent | Retry | Failed` by the
//! [`DeliveryQueue`] workers. The [`Reconciler`] re-enqueues anything due.

pub mod composer;
pub mod notifier;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod sender;

pub use composer::{MessageFields, RenderedMessage, compose};
pub use notifier::Notifier;
pub use queue::{DeliveryOutcome, DeliveryQueue, Dispatcher};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use retry::{RetryDecision, RetryPolicy};
pub use sender::{LogSender, Sender};
