//! Subscription records and identifiers.
//!
//! A [`Subscription`] is a time-bounded registration of a callback URL for one
//! device. Its lifecycle is `Created -> Live -> Expired` and the only
//! transition after creation is driven by time: a subscription is live while
//! `now < expiration`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use presence_store::DeviceId;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

/// Prefix used for subscription IDs in `SID` headers.
pub const SID_PREFIX: &str = "uuid:";

/// Opaque identifier of a subscription.
///
/// Generated IDs are random v4 UUIDs in simple form (32 lowercase hex digits).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a subscription ID from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random subscription ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse the value of a `SID` header (`uuid:<id>`).
    ///
    /// The `uuid:` prefix is matched case-insensitively and surrounding
    /// whitespace is ignored. Returns `None` for a missing prefix or empty ID.
    pub fn from_sid(header: &str) -> Option<Self> {
        let header = header.trim();
        let prefix = header.get(..SID_PREFIX.len())?;
        if !prefix.eq_ignore_ascii_case(SID_PREFIX) {
            return None;
        }

        let id = header[SID_PREFIX.len()..].trim();
        if id.is_empty() {
            None
        } else {
            Some(Self(id.to_string()))
        }
    }

    /// Render this ID as a `SID` header value.
    pub fn to_sid(&self) -> String {
        format!("{SID_PREFIX}{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease length asked for by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedTimeout {
    /// `Second-<n>`
    Seconds(u64),
    /// `Second-infinite`
    Infinite,
}

/// Parameters of a subscription about to be created.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Callback URL as received; validated when the subscription is added
    pub callback: String,
    /// Granted lease length
    pub duration: Duration,
}

impl NewSubscription {
    pub fn new(callback: impl Into<String>, duration: Duration) -> Self {
        Self {
            callback: callback.into(),
            duration,
        }
    }
}

/// An event subscription owned by the callback registry.
///
/// Clones share the event sequence counter, so a copy handed to the
/// dispatcher keeps numbering consistent with the registry's record.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    device_id: DeviceId,
    callback: Url,
    duration: Duration,
    created_at: Instant,
    expiration: Instant,
    sequence: Arc<AtomicU32>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        device_id: DeviceId,
        callback: Url,
        duration: Duration,
        now: Instant,
    ) -> Self {
        Self {
            id,
            device_id,
            callback,
            duration,
            created_at: now,
            expiration: now + duration,
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn callback(&self) -> &Url {
        &self.callback
    }

    /// Currently granted lease length.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expiration(&self) -> Instant {
        self.expiration
    }

    /// Whether the subscription is live at `now`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expiration
    }

    /// Time left on the lease, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expiration.saturating_duration_since(now)
    }

    /// Take the next event sequence number (`SEQ` header).
    ///
    /// Starts at 0 for the initial event. On overflow the counter wraps to 1,
    /// since 0 is reserved for the initial event.
    pub fn next_sequence(&self) -> u32 {
        let previous = self
            .sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seq| {
                Some(seq.checked_add(1).unwrap_or(1))
            });
        // fetch_update with a closure that always returns Some cannot fail
        previous.unwrap_or_else(|seq| seq)
    }

    /// Replace the lease with `duration` starting at `now`.
    pub(crate) fn renew(&mut self, duration: Duration, now: Instant) {
        self.duration = duration;
        self.expiration = now + duration;
    }
}
