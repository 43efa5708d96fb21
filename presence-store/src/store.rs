//! Shared presence storage with change detection
//!
//! `PresenceStore` holds the last-known [`PresenceState`] for every device.
//! It only reports whether a write changed the stored value; deciding what
//! to do about a change (notifying subscribers) is the caller's concern.

use std::sync::Arc;

use dashmap::DashMap;

use crate::device::DeviceId;
use crate::state::PresenceState;

/// Process-wide presence state keyed by device
///
/// Cloning a `PresenceStore` yields another handle to the same underlying
/// map, so the store can be shared between request handlers.
///
/// # Concurrency
///
/// Writes to one device are serialized by the map's shard lock, so the
/// read-compare-write in [`set`](Self::set) is atomic per device. Writes to
/// devices in different shards proceed in parallel.
///
/// # Example
///
/// ```rust
/// use presence_store::{DeviceId, PresenceState, PresenceStore};
///
/// let store = PresenceStore::new();
/// let phone = DeviceId::new("phone-1");
///
/// // Never-seen devices read as absent
/// assert_eq!(store.get(&phone), PresenceState::Absent);
///
/// // First transition reports a change
/// assert!(store.set(&phone, PresenceState::Present));
///
/// // Same value reports no change
/// assert!(!store.set(&phone, PresenceState::Present));
///
/// assert_eq!(store.get(&phone), PresenceState::Present);
/// ```
#[derive(Clone, Default)]
pub struct PresenceStore {
    states: Arc<DashMap<DeviceId, PresenceState>>,
}

impl PresenceStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            states: Arc::new(DashMap::new()),
        }
    }

    /// Get the presence of a device
    ///
    /// Devices that have never been set are `Absent`.
    pub fn get(&self, device_id: &DeviceId) -> PresenceState {
        self.states
            .get(device_id)
            .map(|state| *state)
            .unwrap_or_default()
    }

    /// Set the presence of a device, returning whether the value changed
    ///
    /// The prior value of a never-seen device is taken to be `Absent`, so
    /// setting `Absent` on a new device reports no change.
    pub fn set(&self, device_id: &DeviceId, state: PresenceState) -> bool {
        let mut entry = self.states.entry(device_id.clone()).or_default();
        let previous = *entry;
        if previous == state {
            return false;
        }

        *entry = state;
        drop(entry);

        tracing::debug!(
            device_id = %device_id,
            from = %previous,
            to = %state,
            "presence changed"
        );
        true
    }

    /// Copy of every stored device and its presence, in no particular order
    pub fn snapshot(&self) -> Vec<(DeviceId, PresenceState)> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Number of devices that have been written at least once
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl std::fmt::Debug for PresenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceStore")
            .field("device_count", &self.states.len())
            .finish()
    }
}
