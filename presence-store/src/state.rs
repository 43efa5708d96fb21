//! Presence values.

use std::str::FromStr;

/// Binary presence of a device.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub enum PresenceState {
    /// Device is currently present
    Present,
    /// Device is away, or has never been reported
    #[default]
    Absent,
}

impl PresenceState {
    /// Wire representation used in documents and event bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Present => "Present",
            PresenceState::Absent => "Absent",
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, PresenceState::Present)
    }
}

impl From<bool> for PresenceState {
    fn from(present: bool) -> Self {
        if present {
            PresenceState::Present
        } else {
            PresenceState::Absent
        }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a recognized presence value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized presence value: {0:?} (expected Present or Absent)")]
pub struct ParsePresenceError(pub String);

impl FromStr for PresenceState {
    type Err = ParsePresenceError;

    /// Parses `Present` / `Absent`, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("present") {
            Ok(PresenceState::Present)
        } else if trimmed.eq_ignore_ascii_case("absent") {
            Ok(PresenceState::Absent)
        } else {
            Err(ParsePresenceError(s.to_string()))
        }
    }
}
