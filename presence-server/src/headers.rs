//! Parsing of the GENA request headers `CALLBACK`, `TIMEOUT` and `SID`.

use std::time::Duration;

use presence_events::{RequestedTimeout, SubscriptionId};

const TIMEOUT_PREFIX: &str = "Second-";

/// A subscription header that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("Missing {0} header")]
    Missing(&'static str),

    #[error("Malformed CALLBACK header: {0:?}")]
    InvalidCallback(String),

    #[error("Malformed TIMEOUT header: {0:?}")]
    InvalidTimeout(String),

    #[error("Malformed SID header: {0:?}")]
    InvalidSid(String),

    #[error("{0} header is not valid UTF-8")]
    NotUtf8(&'static str),

    #[error("SID and CALLBACK must not be combined")]
    SidWithCallback,
}

/// Extract the first URL of a `CALLBACK` header.
///
/// The header lists one or more URLs, each enclosed in angle brackets:
/// `<http://10.0.0.5:39500/notify><http://backup/notify>`. Only the
/// bracket syntax is checked here; the URL itself is validated when the
/// subscription is registered.
pub fn parse_callback(value: &str) -> Result<String, HeaderError> {
    let invalid = || HeaderError::InvalidCallback(value.to_string());

    let rest = value.trim().strip_prefix('<').ok_or_else(invalid)?;
    let end = rest.find('>').ok_or_else(invalid)?;
    let url = rest[..end].trim();
    if url.is_empty() {
        return Err(invalid());
    }

    Ok(url.to_string())
}

/// Parse a `TIMEOUT` header of the form `Second-<n>` or `Second-infinite`.
///
/// The prefix and the `infinite` keyword are matched case-insensitively.
/// `Second-0` is rejected.
pub fn parse_timeout(value: &str) -> Result<RequestedTimeout, HeaderError> {
    let invalid = || HeaderError::InvalidTimeout(value.to_string());

    let trimmed = value.trim();
    let prefix = trimmed.get(..TIMEOUT_PREFIX.len()).ok_or_else(invalid)?;
    if !prefix.eq_ignore_ascii_case(TIMEOUT_PREFIX) {
        return Err(invalid());
    }

    let amount = &trimmed[TIMEOUT_PREFIX.len()..];
    if amount.eq_ignore_ascii_case("infinite") {
        return Ok(RequestedTimeout::Infinite);
    }

    match amount.parse::<u64>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(secs) => Ok(RequestedTimeout::Seconds(secs)),
    }
}

/// Parse a `SID: uuid:<id>` header.
pub fn parse_sid(value: &str) -> Result<SubscriptionId, HeaderError> {
    SubscriptionId::from_sid(value).ok_or_else(|| HeaderError::InvalidSid(value.to_string()))
}

/// Render a granted lease as a `TIMEOUT` response header value.
pub fn format_timeout(duration: Duration) -> String {
    format!("{TIMEOUT_PREFIX}{}", duration.as_secs())
}
