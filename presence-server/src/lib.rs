//! HTTP control surface of the UPnP presence adapter.
//!
//! Each tracked device is exposed at `/devices/{id}`:
//!
//! | Method        | Effect                                                         |
//! |---------------|----------------------------------------------------------------|
//! | `GET`         | UPnP device description document, or `404` for unknown devices |
//! | `SUBSCRIBE`   | New subscription (`CALLBACK`, `TIMEOUT`) or renewal (`SID`)    |
//! | `UNSUBSCRIBE` | Cancel the subscription named by `SID`                         |
//! | `PUT`         | Override presence with `state=Present` or `state=Absent`       |
//!
//! Any other method answers `404`. Malformed headers or bodies answer `400`,
//! and an unknown or expired `SID` answers `412`.
//!
//! Presence changes are sent to subscribers as GENA `NOTIFY` requests by
//! [`presence_events::NotificationDispatcher`]; the `PUT` response does not
//! wait for them.
//!
//! # Example
//!
//! ```no_run
//! use presence_server::{DeviceCatalog, PresenceServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     presence_server::logging::init_logging_from_env()?;
//!
//!     let devices = DeviceCatalog::new()
//!         .with_device("phone-1", "Alice's Phone")
//!         .with_device("phone-2", "Bob's Phone");
//!
//!     let server = PresenceServer::start(ServerConfig::default().with_devices(devices)).await?;
//!     println!("Presence adapter at {}", server.base_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod description;
pub mod error;
pub mod headers;
pub mod logging;
pub mod server;

pub use config::ServerConfig;
pub use description::{DescriptionSource, DeviceCatalog};
pub use error::{RequestError, ServerError};
pub use headers::HeaderError;
pub use logging::{init_logging, LoggingMode};
pub use server::{PresenceServer, DEVICE_HEADER};
