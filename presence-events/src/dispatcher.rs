//! Presence change fan-out.
//!
//! The dispatcher ties the presence store to the callback registry: a write
//! that changes a device's presence produces one notification per live
//! subscription of that device. Deliveries run concurrently and each one's
//! failure is captured in its own [`DeliveryOutcome`].
//!
//! Writes, new subscriptions and sequence numbering of one device are
//! serialized by a per-device lock, so a higher `SEQ` always carries a later
//! state. Deliveries run after the lock is released and may arrive out of
//! order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use presence_store::{DeviceId, PresenceState, PresenceStore};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, timeout, Instant};
use url::Url;

use crate::config::AdapterConfig;
use crate::delivery::EventDelivery;
use crate::error::{DeliveryError, RegistryError};
use crate::event::{Notification, PresenceEvent};
use crate::registry::CallbackRegistry;
use crate::subscription::{NewSubscription, Subscription, SubscriptionId};

/// Result of delivering one event to one subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub subscription_id: SubscriptionId,
    pub callback: Url,
    pub result: Result<(), DeliveryError>,
}

/// Summary of a single `notify_if_changed` call.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub device_id: DeviceId,
    pub state: PresenceState,
    /// Whether the store value changed; no deliveries are attempted otherwise
    pub changed: bool,
    /// One entry per live subscription, in no particular order
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

#[derive(Debug, Clone, Copy)]
struct DeliveryPolicy {
    timeout: Duration,
    attempts: u32,
    backoff_base: Duration,
}

/// Fans presence changes out to subscribers.
///
/// Holds handles to the shared store and registry plus the per-device lock
/// table; clones share all of them.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: PresenceStore,
    registry: CallbackRegistry,
    delivery: Arc<dyn EventDelivery>,
    policy: DeliveryPolicy,
    initial_event: bool,
    device_locks: Arc<DashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl NotificationDispatcher {
    pub fn new(
        store: PresenceStore,
        registry: CallbackRegistry,
        delivery: Arc<dyn EventDelivery>,
        config: &AdapterConfig,
    ) -> Self {
        Self {
            store,
            registry,
            delivery,
            policy: DeliveryPolicy {
                timeout: config.delivery_timeout,
                attempts: config.delivery_attempts.max(1),
                backoff_base: config.retry_backoff_base,
            },
            initial_event: config.initial_event,
            device_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &PresenceStore {
        &self.store
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Record `state` for the device and, if it changed, notify every live
    /// subscriber before returning.
    ///
    /// Delivery failures are logged and reported, never returned as errors.
    pub async fn notify_if_changed(
        &self,
        device_id: &DeviceId,
        state: PresenceState,
    ) -> DispatchReport {
        let (changed, outcomes) = match self.record_change(device_id, state).await {
            Some(notifications) => (true, self.deliver_all(notifications).await),
            None => (false, Vec::new()),
        };

        DispatchReport {
            device_id: device_id.clone(),
            state,
            changed,
            outcomes,
        }
    }

    /// Record `state` for the device and, if it changed, notify subscribers
    /// in the background.
    ///
    /// The store is updated and sequence numbers are assigned before this
    /// returns; deliveries complete later. Must be called from within a
    /// tokio runtime.
    pub async fn publish(&self, device_id: &DeviceId, state: PresenceState) -> bool {
        let Some(notifications) = self.record_change(device_id, state).await else {
            return false;
        };

        let dispatcher = self.clone();
        let device_id = device_id.clone();
        tokio::spawn(async move {
            let outcomes = dispatcher.deliver_all(notifications).await;
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            tracing::debug!(
                device_id = %device_id,
                state = %state,
                attempted = outcomes.len(),
                failed,
                "presence change dispatched"
            );
        });
        true
    }

    /// Register a subscription and, when initial events are enabled, send it
    /// the device's current presence in the background.
    ///
    /// The initial event always carries `SEQ` 0: no change to the device can
    /// be numbered between the registration and the initial event.
    ///
    /// # Errors
    /// Any [`RegistryError`] from [`CallbackRegistry::add`].
    pub async fn subscribe(
        &self,
        device_id: &DeviceId,
        request: NewSubscription,
    ) -> Result<Subscription, RegistryError> {
        let guard = self.lock_device(device_id).await;
        let subscription = self.registry.add(device_id, request).await?;
        if !self.initial_event {
            return Ok(subscription);
        }

        let event = PresenceEvent::new(device_id.clone(), self.store.get(device_id));
        let notification = Notification::for_subscription(&subscription, event);
        drop(guard);

        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.deliver_with_retry(&notification).await {
                tracing::warn!(
                    device_id = %notification.event.device_id,
                    sid = %notification.subscription_id,
                    callback = %notification.callback,
                    error = %e,
                    "initial event delivery failed"
                );
            }
        });
        Ok(subscription)
    }

    async fn lock_device(&self, device_id: &DeviceId) -> OwnedMutexGuard<()> {
        // The map guard is released before awaiting the device lock
        let lock = self.device_locks.entry(device_id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Store `state` and number one notification per live subscriber, or
    /// `None` if the state did not change.
    async fn record_change(
        &self,
        device_id: &DeviceId,
        state: PresenceState,
    ) -> Option<Vec<Notification>> {
        let _guard = self.lock_device(device_id).await;
        if !self.store.set(device_id, state) {
            return None;
        }

        // list_live copies the subscriptions out; no registry lock is held below
        let subscribers = self.registry.list_live(device_id, Instant::now()).await;
        let event = PresenceEvent::new(device_id.clone(), state);
        Some(
            subscribers
                .iter()
                .map(|subscription| Notification::for_subscription(subscription, event.clone()))
                .collect(),
        )
    }

    async fn deliver_all(&self, notifications: Vec<Notification>) -> Vec<DeliveryOutcome> {
        let deliveries = notifications.into_iter().map(|notification| async move {
            let result = self.deliver_with_retry(&notification).await;
            if let Err(e) = &result {
                tracing::warn!(
                    device_id = %notification.event.device_id,
                    sid = %notification.subscription_id,
                    callback = %notification.callback,
                    error = %e,
                    "event delivery failed"
                );
            }
            DeliveryOutcome {
                subscription_id: notification.subscription_id,
                callback: notification.callback,
                result,
            }
        });

        join_all(deliveries).await
    }

    /// Deliver with the configured timeout, retrying with exponential backoff.
    ///
    /// Attempt `n` (n >= 2) waits `backoff_base * 2^(n-2)` first.
    async fn deliver_with_retry(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.policy.timeout, self.delivery.deliver(notification)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.policy.timeout)),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.policy.attempts => return Err(e),
                Err(e) => {
                    let backoff = self
                        .policy
                        .backoff_base
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    tracing::debug!(
                        sid = %notification.subscription_id,
                        attempt,
                        max_attempts = self.policy.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying event delivery"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    const GOOD: &str = "http://10.0.0.1:9000/good";
    const BAD: &str = "http://10.0.0.2:9000/bad";

    /// Records every attempt; callbacks listed in `failures` fail that many times.
    #[derive(Default)]
    struct RecordingDelivery {
        attempts: Mutex<Vec<Notification>>,
        failures: Mutex<HashMap<String, u32>>,
        delay: Option<Duration>,
    }

    impl RecordingDelivery {
        fn failing(callback: &str, times: u32) -> Self {
            let delivery = Self::default();
            delivery
                .failures
                .lock()
                .unwrap()
                .insert(callback.to_string(), times);
            delivery
        }

        fn attempts_to(&self, callback: &str) -> usize {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .filter(|n| n.callback.as_str() == callback)
                .count()
        }

        fn total_attempts(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventDelivery for RecordingDelivery {
        async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(notification.clone());
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }

            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(notification.callback.as_str()) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(DeliveryError::Network("connection refused".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    /// Forwards every notification to a channel.
    struct ChannelDelivery(mpsc::UnboundedSender<Notification>);

    #[async_trait]
    impl EventDelivery for ChannelDelivery {
        async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
            let _ = self.0.send(notification.clone());
            Ok(())
        }
    }

    fn dispatcher_with(
        delivery: Arc<dyn EventDelivery>,
        config: &AdapterConfig,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(PresenceStore::new(), CallbackRegistry::new(), delivery, config)
    }

    async fn subscribe(dispatcher: &NotificationDispatcher, device: &DeviceId, callback: &str) -> Subscription {
        dispatcher
            .registry()
            .add(device, NewSubscription::new(callback, Duration::from_secs(60)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_change_delivers_once_to_each_subscriber() {
        let delivery = Arc::new(RecordingDelivery::default());
        let dispatcher = dispatcher_with(delivery.clone(), &AdapterConfig::default());
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, GOOD).await;
        subscribe(&dispatcher, &device, BAD).await;

        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert!(report.changed);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.delivered(), 2);
        assert_eq!(delivery.attempts_to(GOOD), 1);
        assert_eq!(delivery.attempts_to(BAD), 1);

        let attempts = delivery.attempts.lock().unwrap();
        assert!(attempts
            .iter()
            .all(|n| n.event == PresenceEvent::new(device.clone(), PresenceState::Present)));
    }

    #[tokio::test]
    async fn test_failure_does_not_suppress_other_subscriber() {
        let delivery = Arc::new(RecordingDelivery::failing(BAD, u32::MAX));
        let dispatcher = dispatcher_with(delivery.clone(), &AdapterConfig::default());
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, GOOD).await;
        let bad = subscribe(&dispatcher, &device, BAD).await;

        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert!(report.changed);
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failed(), 1);
        let failure = report.failures().next().unwrap();
        assert_eq!(&failure.subscription_id, bad.id());
        assert!(matches!(failure.result, Err(DeliveryError::Network(_))));

        // Exactly one attempt each: no synchronous retry by default
        assert_eq!(delivery.attempts_to(GOOD), 1);
        assert_eq!(delivery.attempts_to(BAD), 1);
        // The store was still updated
        assert_eq!(dispatcher.store().get(&device), PresenceState::Present);
    }

    #[tokio::test]
    async fn test_unchanged_state_delivers_nothing() {
        let delivery = Arc::new(RecordingDelivery::default());
        let dispatcher = dispatcher_with(delivery.clone(), &AdapterConfig::default());
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, GOOD).await;

        // Never-set devices are already Absent
        let report = dispatcher.notify_if_changed(&device, PresenceState::Absent).await;
        assert!(!report.changed);
        assert_eq!(report.attempted(), 0);

        dispatcher.notify_if_changed(&device, PresenceState::Present).await;
        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;
        assert!(!report.changed);
        assert_eq!(delivery.total_attempts(), 1);
    }

    #[tokio::test]
    async fn test_only_subscribers_of_the_device_are_notified() {
        let delivery = Arc::new(RecordingDelivery::default());
        let dispatcher = dispatcher_with(delivery.clone(), &AdapterConfig::default());
        subscribe(&dispatcher, &DeviceId::new("other"), BAD).await;
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, GOOD).await;

        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert_eq!(report.attempted(), 1);
        assert_eq!(delivery.attempts_to(BAD), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_subscriber_not_notified() {
        let delivery = Arc::new(RecordingDelivery::default());
        let dispatcher = dispatcher_with(delivery.clone(), &AdapterConfig::default());
        let device = DeviceId::new("phone-1");
        dispatcher
            .registry()
            .add(&device, NewSubscription::new(GOOD, Duration::from_secs(10)))
            .await
            .unwrap();

        sleep(Duration::from_secs(11)).await;
        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert!(report.changed);
        assert_eq!(report.attempted(), 0);
        assert_eq!(delivery.total_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_times_out_alone() {
        let delivery = Arc::new(RecordingDelivery {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let config = AdapterConfig::default().with_delivery_timeout(Duration::from_secs(2));
        let dispatcher = dispatcher_with(delivery.clone(), &config);
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, GOOD).await;
        subscribe(&dispatcher, &device, BAD).await;

        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert_eq!(report.failed(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.result == Err(DeliveryError::Timeout(Duration::from_secs(2)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff() {
        let delivery = Arc::new(RecordingDelivery::failing(BAD, 2));
        let config = AdapterConfig::default().with_retries(3, Duration::from_secs(1));
        let dispatcher = dispatcher_with(delivery.clone(), &config);
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, BAD).await;
        subscribe(&dispatcher, &device, GOOD).await;

        let started = Instant::now();
        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert_eq!(report.delivered(), 2);
        assert_eq!(delivery.attempts_to(BAD), 3);
        assert_eq!(delivery.attempts_to(GOOD), 1);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));

        // Retries reuse the sequence number of the event
        let attempts = delivery.attempts.lock().unwrap();
        let sequences: Vec<u32> = attempts
            .iter()
            .filter(|n| n.callback.as_str() == BAD)
            .map(|n| n.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let delivery = Arc::new(RecordingDelivery::failing(BAD, u32::MAX));
        let config = AdapterConfig::default().with_retries(2, Duration::from_millis(100));
        let dispatcher = dispatcher_with(delivery.clone(), &config);
        let device = DeviceId::new("phone-1");
        subscribe(&dispatcher, &device, BAD).await;

        let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(delivery.attempts_to(BAD), 2);
    }

    #[tokio::test]
    async fn test_publish_updates_store_and_delivers_in_background() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = dispatcher_with(Arc::new(ChannelDelivery(tx)), &AdapterConfig::default());
        let device = DeviceId::new("phone-1");
        let sub = subscribe(&dispatcher, &device, GOOD).await;

        assert!(dispatcher.publish(&device, PresenceState::Present).await);
        assert_eq!(dispatcher.store().get(&device), PresenceState::Present);

        let notification = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Timeout waiting for notification")
            .expect("No notification received");
        assert_eq!(&notification.subscription_id, sub.id());
        assert_eq!(notification.event.state, PresenceState::Present);

        // No change, nothing spawned
        assert!(!dispatcher.publish(&device, PresenceState::Present).await);
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    async fn next_notification(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timeout waiting for notification")
            .expect("No notification received")
    }

    #[tokio::test]
    async fn test_initial_event_then_change_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = dispatcher_with(Arc::new(ChannelDelivery(tx)), &AdapterConfig::default());
        let device = DeviceId::new("phone-1");

        let sub = dispatcher
            .subscribe(&device, NewSubscription::new(GOOD, Duration::from_secs(60)))
            .await
            .unwrap();
        let initial = next_notification(&mut rx).await;
        assert_eq!(&initial.subscription_id, sub.id());
        assert_eq!(initial.sequence, 0);
        assert_eq!(initial.event.state, PresenceState::Absent);

        dispatcher.notify_if_changed(&device, PresenceState::Present).await;
        let change = next_notification(&mut rx).await;
        assert_eq!(change.sequence, 1);
        assert_eq!(change.event.state, PresenceState::Present);
    }

    #[tokio::test]
    async fn test_subscribe_without_initial_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = AdapterConfig::default().with_initial_event(false);
        let dispatcher = dispatcher_with(Arc::new(ChannelDelivery(tx)), &config);
        let device = DeviceId::new("phone-1");

        dispatcher
            .subscribe(&device, NewSubscription::new(GOOD, Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        let invalid = dispatcher
            .subscribe(&device, NewSubscription::new("not a uri", Duration::from_secs(60)))
            .await;
        assert!(matches!(invalid, Err(RegistryError::InvalidInput(_))));
        assert_eq!(dispatcher.registry().len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_back_to_back_publishes_number_states_in_order() {
        for _ in 0..500 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let dispatcher = dispatcher_with(Arc::new(ChannelDelivery(tx)), &AdapterConfig::default());
            let device = DeviceId::new("phone-1");
            subscribe(&dispatcher, &device, GOOD).await;

            assert!(dispatcher.publish(&device, PresenceState::Present).await);
            assert!(dispatcher.publish(&device, PresenceState::Absent).await);

            let first = next_notification(&mut rx).await;
            let second = next_notification(&mut rx).await;
            let latest = if first.sequence > second.sequence { first } else { second };
            assert_eq!(latest.sequence, 1);
            assert_eq!(latest.event.state, dispatcher.store().get(&device));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_keep_sequence_consistent_with_store() {
        for _ in 0..20 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let dispatcher = dispatcher_with(Arc::new(ChannelDelivery(tx)), &AdapterConfig::default());
            let device = DeviceId::new("phone-1");
            subscribe(&dispatcher, &device, GOOD).await;

            let handles: Vec<_> = (0..8u32)
                .map(|i| {
                    let dispatcher = dispatcher.clone();
                    let device = device.clone();
                    tokio::spawn(async move {
                        let mut changes = 0u32;
                        for j in 0..25u32 {
                            let state = PresenceState::from((i + j) % 2 == 0);
                            if dispatcher.publish(&device, state).await {
                                changes += 1;
                            }
                        }
                        changes
                    })
                })
                .collect();

            let mut expected = 0u32;
            for handle in handles {
                expected += handle.await.unwrap();
            }

            let mut received = Vec::new();
            for _ in 0..expected {
                received.push(next_notification(&mut rx).await);
            }
            received.sort_by_key(|n| n.sequence);

            let sequences: Vec<u32> = received.iter().map(|n| n.sequence).collect();
            assert_eq!(sequences, (0..expected).collect::<Vec<_>>());
            // Every numbered event is a change from the one before it
            assert!(received
                .windows(2)
                .all(|pair| pair[0].event.state != pair[1].event.state));
            let latest = received.last().unwrap();
            assert_eq!(latest.event.state, dispatcher.store().get(&device));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_initial_event_keeps_sequence_zero_under_concurrent_change() {
        for _ in 0..200 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let dispatcher = dispatcher_with(Arc::new(ChannelDelivery(tx)), &AdapterConfig::default());
            let device = DeviceId::new("phone-1");

            let change = {
                let dispatcher = dispatcher.clone();
                let device = device.clone();
                tokio::spawn(async move {
                    dispatcher.notify_if_changed(&device, PresenceState::Present).await
                })
            };
            dispatcher
                .subscribe(&device, NewSubscription::new(GOOD, Duration::from_secs(60)))
                .await
                .unwrap();
            let report = change.await.unwrap();

            let mut received = vec![next_notification(&mut rx).await];
            if report.attempted() == 1 {
                received.push(next_notification(&mut rx).await);
            }
            received.sort_by_key(|n| n.sequence);

            assert_eq!(received[0].sequence, 0);
            let latest = received.last().unwrap();
            assert_eq!(latest.sequence as usize, report.attempted());
            assert_eq!(latest.event.state, PresenceState::Present);
        }
    }
}
