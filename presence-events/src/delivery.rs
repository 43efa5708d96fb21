//! Outbound event delivery.
//!
//! [`EventDelivery`] is the transport seam used by the dispatcher.
//! [`HttpDelivery`] sends GENA `NOTIFY` requests with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use crate::error::DeliveryError;
use crate::event::{Notification, EVENT_CONTENT_TYPE, NTS_PROPCHANGE, NT_EVENT};

/// Delivers one notification to one subscriber.
///
/// Implementations report every failure as a [`DeliveryError`]; they must not
/// panic and need not retry.
#[async_trait]
pub trait EventDelivery: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// HTTP `NOTIFY` delivery
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDelivery {
    /// Create a delivery client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    fn notify_method() -> Result<Method, DeliveryError> {
        Method::from_bytes(b"NOTIFY").map_err(|e| DeliveryError::Client(e.to_string()))
    }
}

#[async_trait]
impl EventDelivery for HttpDelivery {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let response = self
            .client
            .request(Self::notify_method()?, notification.callback.clone())
            .header(CONTENT_TYPE, EVENT_CONTENT_TYPE)
            .header("NT", NT_EVENT)
            .header("NTS", NTS_PROPCHANGE)
            .header("SID", notification.subscription_id.to_sid())
            .header("SEQ", notification.sequence.to_string())
            .body(notification.event.to_xml())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
