//! # presence-events
//!
//! Subscription bookkeeping and event delivery for the presence adapter.
//!
//! Components, leaves first:
//!
//! - [`CallbackRegistry`]: time-bounded event subscriptions keyed by ID
//! - [`ExpirationSweeper`]: background task evicting expired subscriptions
//! - [`NotificationDispatcher`]: fans a presence change out to every live
//!   subscription of the device through an [`EventDelivery`]
//! - [`HttpDelivery`]: GENA `NOTIFY` delivery over HTTP
//!
//! Presence itself lives in [`presence_store::PresenceStore`]; the dispatcher
//! reads from it and the registry per notification and keeps no reference
//! between them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use presence_events::{
//!     AdapterConfig, CallbackRegistry, ExpirationSweeper, HttpDelivery, NewSubscription,
//!     NotificationDispatcher,
//! };
//! use presence_store::{DeviceId, PresenceState, PresenceStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdapterConfig::default();
//!     let registry = CallbackRegistry::new();
//!     let sweeper = ExpirationSweeper::start(registry.clone(), config.sweep_interval);
//!     let delivery = Arc::new(HttpDelivery::new(config.delivery_timeout)?);
//!     let dispatcher =
//!         NotificationDispatcher::new(PresenceStore::new(), registry.clone(), delivery, &config);
//!
//!     let device = DeviceId::new("phone-1");
//!     registry
//!         .add(&device, NewSubscription::new("http://192.168.1.20:39500/", Duration::from_secs(1800)))
//!         .await?;
//!
//!     let report = dispatcher.notify_if_changed(&device, PresenceState::Present).await;
//!     println!("delivered {} of {}", report.delivered(), report.attempted());
//!
//!     sweeper.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod registry;
pub mod subscription;
pub mod sweeper;

pub use config::{AdapterConfig, LEASE_CEILING};
pub use delivery::{EventDelivery, HttpDelivery};
pub use dispatcher::{DeliveryOutcome, DispatchReport, NotificationDispatcher};
pub use error::{ConfigError, DeliveryError, RegistryError, Result, SweeperError};
pub use event::{Notification, PresenceEvent};
pub use registry::CallbackRegistry;
pub use subscription::{NewSubscription, RequestedTimeout, Subscription, SubscriptionId};
pub use sweeper::ExpirationSweeper;
