//! Presence state store
//!
//! Holds the last-known presence of every device and reports whether a write
//! actually changed it.
//!
//! # Features
//!
//! - **First-use default**: unknown devices read as [`PresenceState::Absent`]
//! - **Change detection**: [`PresenceStore::set`] returns `true` only when the value differs
//! - **Per-device atomicity**: concurrent writes to one device are serialized,
//!   writes to different devices are independent
//!
//! # Quick Start
//!
//! ```rust
//! use presence_store::{DeviceId, PresenceState, PresenceStore};
//!
//! let store = PresenceStore::new();
//! let device = DeviceId::new("phone-1");
//!
//! if store.set(&device, PresenceState::Present) {
//!     // notify subscribers here
//! }
//!
//! assert_eq!(store.get(&device), PresenceState::Present);
//! ```
//!
//! # Architecture
//!
//! ```text
//! PresenceStore (Clone = shared handle)
//!     │
//!     └── states: Arc<DashMap<DeviceId, PresenceState>>
//! ```

pub mod device;
pub mod state;
pub mod store;

pub use device::DeviceId;
pub use state::{ParsePresenceError, PresenceState};
pub use store::PresenceStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::device::DeviceId;
    pub use crate::state::PresenceState;
    pub use crate::store::PresenceStore;
}
