//! UPnP device description documents.

use std::collections::BTreeMap;

use presence_store::DeviceId;
use quick_xml::escape::escape;

/// Device type advertised for every presence device.
pub const DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:PresenceSensor:1";

const DEVICE_NAMESPACE: &str = "urn:schemas-upnp-org:device-1-0";
const MANUFACTURER: &str = "UPnP Presence Adapter";
const MODEL_NAME: &str = "Presence Sensor";

/// Source of description documents served on `GET /devices/{id}`.
pub trait DescriptionSource: Send + Sync {
    /// The description document of a device, or `None` if it is unknown.
    fn description(&self, device_id: &DeviceId) -> Option<String>;
}

/// Fixed set of devices known to the adapter.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    devices: BTreeMap<DeviceId, String>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device with a friendly name, replacing any previous entry.
    pub fn insert(&mut self, device_id: DeviceId, friendly_name: impl Into<String>) {
        self.devices.insert(device_id, friendly_name.into());
    }

    pub fn with_device(mut self, device_id: impl Into<DeviceId>, friendly_name: impl Into<String>) -> Self {
        self.insert(device_id.into(), friendly_name);
        self
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn friendly_name(&self, device_id: &DeviceId) -> Option<&str> {
        self.devices.get(device_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &str)> {
        self.devices.iter().map(|(id, name)| (id, name.as_str()))
    }
}

impl DescriptionSource for DeviceCatalog {
    fn description(&self, device_id: &DeviceId) -> Option<String> {
        let friendly_name = self.friendly_name(device_id)?;
        Some(render_description(device_id, friendly_name))
    }
}

/// Render the description document of one device.
pub fn render_description(device_id: &DeviceId, friendly_name: &str) -> String {
    let id = escape(device_id.as_str());
    let name = escape(friendly_name);

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="{DEVICE_NAMESPACE}">
  <specVersion>
    <major>1</major>
    <minor>0</minor>
  </specVersion>
  <device>
    <deviceType>{DEVICE_TYPE}</deviceType>
    <friendlyName>{name}</friendlyName>
    <manufacturer>{MANUFACTURER}</manufacturer>
    <modelName>{MODEL_NAME}</modelName>
    <UDN>uuid:{id}</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:PresenceSensor:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:PresenceSensor</serviceId>
        <eventSubURL>/devices/{id}</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#
    )
}
