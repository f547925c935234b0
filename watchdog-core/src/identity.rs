use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdentityError;

pub const DEFAULT_IDENTITY: &str = "watchdog-001";

/// Name of one physical watchdog, used to namespace its broker topics.
///
/// Both the firmware subscriber and the host publisher must use the same
/// identity for commands and status messages to correlate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WatchdogIdentity(String);

impl WatchdogIdentity {
    pub fn new(identity: impl Into<String>) -> Result<Self, IdentityError> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(IdentityError::Empty);
        }
        if let Some(found) = identity.chars().find(|c| matches!(c, '/' | '+' | '#')) {
            return Err(IdentityError::ReservedCharacter { identity, found });
        }
        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `/watchdog/{id}/cmd`
    pub fn command_topic(&self) -> String {
        format!("/watchdog/{}/cmd", self.0)
    }

    /// `/watchdog/{id}/status`
    pub fn status_topic(&self) -> String {
        format!("/watchdog/{}/status", self.0)
    }
}

impl Default for WatchdogIdentity {
    fn default() -> Self {
        Self(DEFAULT_IDENTITY.to_string())
    }
}

impl fmt::Display for WatchdogIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WatchdogIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WatchdogIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WatchdogIdentity> for String {
    fn from(identity: WatchdogIdentity) -> Self {
        identity.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_namespaced_by_identity() {
        let identity = WatchdogIdentity::new("watchdog-001").unwrap();
        assert_eq!(identity.command_topic(), "/watchdog/watchdog-001/cmd");
        assert_eq!(identity.status_topic(), "/watchdog/watchdog-001/status");
    }

    #[test]
    fn test_rejects_empty_and_topic_characters() {
        assert_eq!(WatchdogIdentity::new(""), Err(IdentityError::Empty));
        for bad in ["rack/1", "wd+", "#"] {
            assert!(matches!(
                WatchdogIdentity::new(bad),
                Err(IdentityError::ReservedCharacter { .. })
            ));
        }
    }

    #[test]
    fn test_default_identity() {
        assert_eq!(WatchdogIdentity::default().as_str(), DEFAULT_IDENTITY);
    }
}
