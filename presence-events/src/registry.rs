//! Callback registry with expiration tracking
//!
//! This module stores every active event subscription, keyed by subscription
//! ID. Reads never evict; expired entries are filtered out of reads and
//! physically removed by [`CallbackRegistry::sweep`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use presence_store::DeviceId;
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

use crate::error::{RegistryError, Result};
use crate::subscription::{NewSubscription, Subscription, SubscriptionId};

/// Thread-safe registry of event subscriptions
///
/// `list_live` takes a shared read lock; `add`, `sweep`, `renew` and
/// `remove` take the exclusive write lock. Results are copied out so no lock
/// is held once a method returns. Cloning yields another handle to the same
/// registry.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    /// Mapping from subscription ID to subscription
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
}

impl CallbackRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new subscription for a device, starting its lease now
    ///
    /// # Errors
    /// * `RegistryError::InvalidInput` - empty device ID, callback that is not
    ///   an absolute http(s) URL, or a duration that is zero or too long to
    ///   compute an expiration for
    /// * `RegistryError::Conflict` - the generated ID is already taken
    pub async fn add(
        &self,
        device_id: &DeviceId,
        request: NewSubscription,
    ) -> Result<Subscription> {
        self.add_at(device_id, request, Instant::now()).await
    }

    /// Register a new subscription whose lease starts at `now`
    pub async fn add_at(
        &self,
        device_id: &DeviceId,
        request: NewSubscription,
        now: Instant,
    ) -> Result<Subscription> {
        let callback = validate(device_id, &request, now)?;
        let subscription = Subscription::new(
            SubscriptionId::generate(),
            device_id.clone(),
            callback,
            request.duration,
            now,
        );

        self.insert(subscription.clone()).await?;

        tracing::info!(
            device_id = %device_id,
            sid = %subscription.id(),
            callback = %subscription.callback(),
            duration_secs = subscription.duration().as_secs(),
            "subscription added"
        );
        Ok(subscription)
    }

    /// Live subscriptions of a device at `now`, in no particular order
    ///
    /// Expired entries that have not been swept yet are skipped, never removed.
    pub async fn list_live(&self, device_id: &DeviceId, now: Instant) -> Vec<Subscription> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .values()
            .filter(|sub| sub.device_id() == device_id && sub.is_live(now))
            .cloned()
            .collect()
    }

    /// Remove every subscription whose expiration is at or before `now`
    ///
    /// Returns the number of subscriptions removed.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();

        subscriptions.retain(|sid, sub| {
            let live = sub.is_live(now);
            if !live {
                tracing::debug!(
                    device_id = %sub.device_id(),
                    sid = %sid,
                    "subscription expired"
                );
            }
            live
        });

        before - subscriptions.len()
    }

    /// Extend a live subscription with a fresh lease of `duration` from `now`
    ///
    /// The ID, device, callback and event sequence are kept.
    ///
    /// # Errors
    /// * `RegistryError::InvalidInput` - zero or overflowing duration
    /// * `RegistryError::NotFound` - unknown, expired or belonging to another device
    pub async fn renew(
        &self,
        device_id: &DeviceId,
        id: &SubscriptionId,
        duration: Duration,
        now: Instant,
    ) -> Result<Subscription> {
        validate_duration(duration, now)?;

        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .filter(|sub| sub.device_id() == device_id && sub.is_live(now))
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        subscription.renew(duration, now);

        tracing::debug!(
            device_id = %device_id,
            sid = %id,
            duration_secs = duration.as_secs(),
            "subscription renewed"
        );
        Ok(subscription.clone())
    }

    /// Cancel a subscription of a device
    ///
    /// # Errors
    /// * `RegistryError::NotFound` - unknown ID or belonging to another device
    pub async fn remove(&self, device_id: &DeviceId, id: &SubscriptionId) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get(id) {
            Some(sub) if sub.device_id() == device_id => {}
            _ => return Err(RegistryError::NotFound(id.clone())),
        }

        let removed = subscriptions
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        tracing::info!(device_id = %device_id, sid = %id, "subscription removed");
        Ok(removed)
    }

    /// Look up a subscription by ID, live or not yet swept
    pub async fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.subscriptions.read().await.get(id).cloned()
    }

    /// Number of stored subscriptions, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    async fn insert(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(subscription.id()) {
            return Err(RegistryError::Conflict(subscription.id().clone()));
        }

        subscriptions.insert(subscription.id().clone(), subscription);
        Ok(())
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry").finish_non_exhaustive()
    }
}

/// Check a subscription request before anything is mutated.
fn validate(device_id: &DeviceId, request: &NewSubscription, now: Instant) -> Result<Url> {
    if !device_id.is_valid() {
        return Err(RegistryError::InvalidInput(
            "device id must not be empty".to_string(),
        ));
    }

    validate_duration(request.duration, now)?;

    let callback = Url::parse(request.callback.trim()).map_err(|e| {
        RegistryError::InvalidInput(format!(
            "callback {:?} is not an absolute URI: {e}",
            request.callback
        ))
    })?;

    if !matches!(callback.scheme(), "http" | "https") || callback.host_str().is_none() {
        return Err(RegistryError::InvalidInput(format!(
            "callback {:?} must be an http(s) URL with a host",
            request.callback
        )));
    }

    Ok(callback)
}

/// A lease must be positive and its expiration representable.
fn validate_duration(duration: Duration, now: Instant) -> Result<()> {
    if duration.is_zero() {
        return Err(RegistryError::InvalidInput(
            "subscription duration must be positive".to_string(),
        ));
    }

    if now.checked_add(duration).is_none() {
        return Err(RegistryError::InvalidInput(format!(
            "subscription duration of {} seconds is too long",
            duration.as_secs()
        )));
    }

    Ok(())
}
