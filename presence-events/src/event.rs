//! Presence change events and their wire format.
//!
//! Every event is delivered as a UPnP GENA `NOTIFY` whose body is a
//! `propertyset` with two properties:
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
//!   <e:property><DeviceId>phone-1</DeviceId></e:property>
//!   <e:property><Presence>Present</Presence></e:property>
//! </e:propertyset>
//! ```

use presence_store::{DeviceId, PresenceState};
use quick_xml::escape::escape;
use url::Url;

use crate::subscription::{Subscription, SubscriptionId};

/// `CONTENT-TYPE` of event bodies.
pub const EVENT_CONTENT_TYPE: &str = r#"text/xml; charset="utf-8""#;
/// `NT` header value of event notifications.
pub const NT_EVENT: &str = "upnp:event";
/// `NTS` header value of event notifications.
pub const NTS_PROPCHANGE: &str = "upnp:propchange";
/// XML namespace of the event `propertyset`.
pub const EVENT_NAMESPACE: &str = "urn:schemas-upnp-org:event-1-0";

/// A device's presence at the time the event was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub device_id: DeviceId,
    pub state: PresenceState,
}

impl PresenceEvent {
    pub fn new(device_id: DeviceId, state: PresenceState) -> Self {
        Self { device_id, state }
    }

    /// Render the event as a GENA `propertyset` document.
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                "\n",
                r#"<e:propertyset xmlns:e="{ns}">"#,
                "\n",
                "  <e:property><DeviceId>{device}</DeviceId></e:property>\n",
                "  <e:property><Presence>{state}</Presence></e:property>\n",
                "</e:propertyset>\n",
            ),
            ns = EVENT_NAMESPACE,
            device = escape(self.device_id.as_str()),
            state = self.state.as_str(),
        )
    }
}

/// One event addressed to one subscriber.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subscription_id: SubscriptionId,
    pub callback: Url,
    /// `SEQ` header value
    pub sequence: u32,
    pub event: PresenceEvent,
}

impl Notification {
    /// Address `event` to `subscription`, taking its next sequence number.
    pub fn for_subscription(subscription: &Subscription, event: PresenceEvent) -> Self {
        Self {
            subscription_id: subscription.id().clone(),
            callback: subscription.callback().clone(),
            sequence: subscription.next_sequence(),
            event,
        }
    }
}
