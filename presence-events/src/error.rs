//! Error types for the presence-events crate.

use std::time::Duration;

use crate::subscription::SubscriptionId;

/// Errors from callback registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The request was malformed; nothing was mutated
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No live subscription with this ID exists for the device
    #[error("Subscription not found: {0}")]
    NotFound(SubscriptionId),

    /// A subscription with this ID already exists
    #[error("Subscription ID collision: {0}")]
    Conflict(SubscriptionId),
}

/// Errors from delivering a single event to a single subscriber.
///
/// These are recorded per subscriber and never escalate to the caller that
/// triggered the notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Connection or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// The subscriber did not answer within the delivery timeout
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The subscriber answered with a non-success status
    #[error("Subscriber responded with status {0}")]
    Status(u16),

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Errors from stopping the expiration sweeper.
#[derive(Debug, thiserror::Error)]
pub enum SweeperError {
    #[error("Sweeper task shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Sweeper task panicked: {0}")]
    TaskPanicked(String),
}

/// Invalid configuration provided.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// Convenience type alias for Results using RegistryError.
pub type Result<T> = std::result::Result<T, RegistryError>;
