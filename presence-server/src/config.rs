//! Server configuration.

use std::net::SocketAddr;

use presence_events::{AdapterConfig, ConfigError};
use warp::http::HeaderValue;

use crate::description::DeviceCatalog;

/// Configuration of a [`PresenceServer`](crate::PresenceServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP surface listens on
    pub bind_address: SocketAddr,

    /// Value of the `SERVER` header on subscription responses
    pub server_header: String,

    /// Devices with a description document
    pub devices: DeviceCatalog,

    /// Subscription and delivery behavior
    pub adapter: AdapterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            server_header: default_server_header(),
            devices: DeviceCatalog::default(),
            adapter: AdapterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.adapter.validate()?;

        if self.server_header.trim().is_empty() {
            return Err(ConfigError("Server header must not be empty".to_string()));
        }

        if HeaderValue::from_str(&self.server_header).is_err() {
            return Err(ConfigError(format!(
                "Server header {:?} is not a valid header value",
                self.server_header
            )));
        }

        Ok(())
    }

    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_server_header(mut self, header: impl Into<String>) -> Self {
        self.server_header = header.into();
        self
    }

    pub fn with_devices(mut self, devices: DeviceCatalog) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_adapter_config(mut self, adapter: AdapterConfig) -> Self {
        self.adapter = adapter;
        self
    }
}

fn default_server_header() -> String {
    format!(
        "{}/1.0 UPnP/1.1 upnp-presence-adapter/{}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    )
}
