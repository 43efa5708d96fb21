use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use presence_events::AdapterConfig;
use presence_server::{init_logging, DeviceCatalog, LoggingMode, PresenceServer, ServerConfig};
use presence_store::DeviceId;
use tracing::info;

/// UPnP presence adapter
///
/// Serves device descriptions, accepts event subscriptions and presence
/// overrides on /devices/{id}, and notifies subscribers of presence changes.
#[derive(Parser, Debug)]
#[command(name = "upnp-presence-adapter")]
#[command(version)]
pub struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Device to describe, as `id` or `id=friendly name` (repeatable)
    #[arg(short, long = "device")]
    pub devices: Vec<DeviceArg>,

    /// Seconds between expired-subscription sweeps
    #[arg(long, default_value = "30")]
    pub sweep_interval: u64,

    /// Seconds to wait for a subscriber to accept a notification
    #[arg(long, default_value = "5")]
    pub delivery_timeout: u64,

    /// Delivery attempts per subscriber and event
    #[arg(long, default_value = "1")]
    pub delivery_attempts: u32,

    /// Longest subscription lease granted, in seconds
    #[arg(long, default_value = "86400")]
    pub max_timeout: u64,

    /// Lease granted when a subscriber sends no TIMEOUT, in seconds
    #[arg(long, default_value = "1800")]
    pub default_timeout: u64,

    /// Do not send the current presence to new subscribers
    #[arg(long)]
    pub no_initial_event: bool,

    /// Logging mode: silent, development or debug
    #[arg(long, default_value = "development")]
    pub log_mode: LoggingMode,
}

/// A `--device` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceArg {
    pub id: DeviceId,
    pub name: String,
}

impl FromStr for DeviceArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, name) = match s.split_once('=') {
            Some((id, name)) => (id.trim(), name.trim()),
            None => (s.trim(), s.trim()),
        };

        let id = DeviceId::new(id);
        if !id.is_valid() {
            return Err(format!("device id must not be empty in {s:?}"));
        }

        Ok(Self {
            id,
            name: name.to_string(),
        })
    }
}

impl Args {
    /// Build and validate the server configuration
    pub fn server_config(&self) -> Result<ServerConfig> {
        let adapter = AdapterConfig::default()
            .with_sweep_interval(Duration::from_secs(self.sweep_interval))
            .with_delivery_timeout(Duration::from_secs(self.delivery_timeout))
            .with_retries(self.delivery_attempts, AdapterConfig::default().retry_backoff_base)
            .with_subscription_timeouts(
                Duration::from_secs(self.default_timeout),
                Duration::from_secs(self.max_timeout),
            )
            .with_initial_event(!self.no_initial_event);

        let devices = self
            .devices
            .iter()
            .fold(DeviceCatalog::new(), |catalog, device| {
                catalog.with_device(device.id.clone(), device.name.clone())
            });

        let config = ServerConfig::default()
            .with_bind_address(self.bind)
            .with_devices(devices)
            .with_adapter_config(adapter);

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_mode).context("Failed to initialize logging")?;

    let config = args.server_config()?;
    info!(
        devices = config.devices.len(),
        initial_event = config.adapter.initial_event,
        "starting presence adapter"
    );

    let server = PresenceServer::start(config)
        .await
        .context("Failed to start presence server")?;
    info!("Listening at {}", server.base_url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    server
        .shutdown()
        .await
        .context("Failed to shut down cleanly")?;

    Ok(())
}
