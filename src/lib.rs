//! Leave request lifecycle with transactional balance accounting and
//! at-least-once notification delivery.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod leave;
pub mod model;
pub mod notification;
pub mod store;
pub mod utils;

pub use error::{DeliveryError, Error, Result};
