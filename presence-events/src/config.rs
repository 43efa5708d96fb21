//! Configuration types for the presence-events crate
//!
//! `AdapterConfig` controls subscription leases, the expiration sweep and
//! outbound event delivery.

use std::time::Duration;

use crate::error::ConfigError;
use crate::subscription::RequestedTimeout;

/// Largest value accepted for `max_subscription_timeout` (one year)
pub const LEASE_CEILING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for subscription bookkeeping and event delivery
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// How often expired subscriptions are evicted
    /// Default: 30 seconds
    pub sweep_interval: Duration,

    /// Upper bound on a single delivery attempt
    /// Default: 5 seconds
    pub delivery_timeout: Duration,

    /// Delivery attempts per subscriber per event (1 = no retry)
    /// Default: 1
    pub delivery_attempts: u32,

    /// Base duration for exponential backoff between delivery attempts
    /// Default: 1 second
    pub retry_backoff_base: Duration,

    /// Lease granted when a SUBSCRIBE carries no TIMEOUT header
    /// Default: 1800 seconds (30 minutes)
    pub default_subscription_timeout: Duration,

    /// Longest lease ever granted; `Second-infinite` maps to this
    /// Default: 86400 seconds (1 day)
    pub max_subscription_timeout: Duration,

    /// Send the current presence to each new subscriber
    /// Default: true
    pub initial_event: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(5),
            delivery_attempts: 1,
            retry_backoff_base: Duration::from_secs(1),
            default_subscription_timeout: Duration::from_secs(1800), // 30 minutes
            max_subscription_timeout: Duration::from_secs(86_400),   // 1 day
            initial_event: true,
        }
    }
}

impl AdapterConfig {
    /// Create a new AdapterConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an AdapterConfig that retries failed deliveries
    pub fn reliable_delivery() -> Self {
        Self {
            delivery_attempts: 3,
            retry_backoff_base: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Create an AdapterConfig that evicts expired subscriptions promptly
    pub fn quick_sweep() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Lease to grant for a requested timeout.
    ///
    /// Requests longer than `max_subscription_timeout` are capped. A request
    /// of `Second-0` yields a zero lease, which the registry rejects.
    pub fn grant_lease(&self, requested: Option<RequestedTimeout>) -> Duration {
        match requested {
            None => self.default_subscription_timeout,
            Some(RequestedTimeout::Infinite) => self.max_subscription_timeout,
            Some(RequestedTimeout::Seconds(secs)) => {
                Duration::from_secs(secs).min(self.max_subscription_timeout)
            }
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        if self.delivery_timeout.is_zero() {
            return Err(ConfigError(
                "Delivery timeout must be greater than 0".to_string(),
            ));
        }

        if self.delivery_attempts == 0 {
            return Err(ConfigError(
                "Delivery attempts must be at least 1".to_string(),
            ));
        }

        if self.default_subscription_timeout.is_zero() {
            return Err(ConfigError(
                "Default subscription timeout must be greater than 0".to_string(),
            ));
        }

        if self.default_subscription_timeout > self.max_subscription_timeout {
            return Err(ConfigError(
                "Default subscription timeout must not exceed the maximum".to_string(),
            ));
        }

        if self.max_subscription_timeout > LEASE_CEILING {
            return Err(ConfigError(format!(
                "Maximum subscription timeout must not exceed {} seconds",
                LEASE_CEILING.as_secs()
            )));
        }

        Ok(())
    }

    // Builder pattern methods for fluent configuration

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, attempts: u32, backoff_base: Duration) -> Self {
        self.delivery_attempts = attempts;
        self.retry_backoff_base = backoff_base;
        self
    }

    pub fn with_subscription_timeouts(mut self, default: Duration, max: Duration) -> Self {
        self.default_subscription_timeout = default;
        self.max_subscription_timeout = max;
        self
    }

    pub fn with_initial_event(mut self, enabled: bool) -> Self {
        self.initial_event = enabled;
        self
    }
}
