//! Command envelopes published on `/watchdog/{id}/cmd`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EnvelopeError;

/// Physical button the firmware pulses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Power,
    Reset,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Power => f.write_str("power"),
            PowerAction::Reset => f.write_str("reset"),
        }
    }
}

/// `{"cmd": "power"|"reset", "duration"?: ms}`
///
/// A missing duration tells the firmware to use its configured pulse length.
/// Construction and decoding both reject non-positive durations, so an
/// invalid envelope never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct CommandEnvelope {
    cmd: PowerAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u32>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    cmd: PowerAction,
    #[serde(default)]
    duration: Option<i64>,
}

impl TryFrom<WireEnvelope> for CommandEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        CommandEnvelope::new(wire.cmd, wire.duration)
    }
}

impl CommandEnvelope {
    pub fn new(cmd: PowerAction, duration_ms: Option<i64>) -> Result<Self, EnvelopeError> {
        let duration = duration_ms
            .map(|ms| {
                u32::try_from(ms)
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or(EnvelopeError::InvalidDuration(ms))
            })
            .transpose()?;
        Ok(Self { cmd, duration })
    }

    pub fn cmd(&self) -> PowerAction {
        self.cmd
    }

    pub fn duration_ms(&self) -> Option<u32> {
        self.duration
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(payload).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }
}

/// Operator command vocabulary. `Listen` stays local: it only holds the
/// status subscription open and never produces an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Power,
    Reset,
    Listen,
}

impl RelayCommand {
    pub fn action(self) -> Option<PowerAction> {
        match self {
            RelayCommand::Power => Some(PowerAction::Power),
            RelayCommand::Reset => Some(PowerAction::Reset),
            RelayCommand::Listen => None,
        }
    }

    /// Envelope to publish for this command, validated up front
    pub fn envelope(self, duration_ms: Option<i64>) -> Result<Option<CommandEnvelope>, EnvelopeError> {
        self.action()
            .map(|action| CommandEnvelope::new(action, duration_ms))
            .transpose()
    }
}

impl FromStr for RelayCommand {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "power" => Ok(RelayCommand::Power),
            "reset" => Ok(RelayCommand::Reset),
            "listen" => Ok(RelayCommand::Listen),
            other => Err(EnvelopeError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayCommand::Power => f.write_str("power"),
            RelayCommand::Reset => f.write_str("reset"),
            RelayCommand::Listen => f.write_str("listen"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_with_duration_wire_format() {
        let envelope = CommandEnvelope::new(PowerAction::Power, Some(300)).unwrap();
        let wire = envelope.encode().unwrap();
        assert_eq!(wire, br#"{"cmd":"power","duration":300}"#);
    }

    #[test]
    fn test_absent_duration_is_omitted() {
        let envelope = CommandEnvelope::new(PowerAction::Reset, None).unwrap();
        let wire = envelope.encode().unwrap();
        assert_eq!(wire, br#"{"cmd":"reset"}"#);

        let decoded = CommandEnvelope::decode(&wire).unwrap();
        assert_eq!(decoded.duration_ms(), None);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_restores_envelope() {
        let envelope = CommandEnvelope::new(PowerAction::Power, Some(500)).unwrap();
        let decoded = CommandEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.cmd(), PowerAction::Power);
        assert_eq!(decoded.duration_ms(), Some(500));
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        for bad in [0, -1, -500] {
            assert_eq!(
                CommandEnvelope::new(PowerAction::Power, Some(bad)),
                Err(EnvelopeError::InvalidDuration(bad))
            );
        }
        assert_eq!(
            RelayCommand::Reset.envelope(Some(0)),
            Err(EnvelopeError::InvalidDuration(0))
        );
        assert!(CommandEnvelope::new(PowerAction::Power, Some(i64::from(u32::MAX) + 1)).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_payloads() {
        assert!(CommandEnvelope::decode(br#"{"cmd":"power","duration":0}"#).is_err());
        assert!(CommandEnvelope::decode(br#"{"cmd":"listen"}"#).is_err());
        assert!(CommandEnvelope::decode(br#"{"duration":100}"#).is_err());
        assert!(CommandEnvelope::decode(b"power").is_err());
        // explicit null is the same as absent
        let decoded = CommandEnvelope::decode(br#"{"cmd":"reset","duration":null}"#).unwrap();
        assert_eq!(decoded.duration_ms(), None);
    }

    #[test]
    fn test_listen_has_no_envelope() {
        assert_eq!(RelayCommand::Listen.envelope(Some(300)), Ok(None));
        assert_eq!(RelayCommand::Listen.action(), None);
    }

    #[test]
    fn test_command_vocabulary() {
        assert_eq!("power".parse::<RelayCommand>(), Ok(RelayCommand::Power));
        assert_eq!("reset".parse::<RelayCommand>(), Ok(RelayCommand::Reset));
        assert_eq!("listen".parse::<RelayCommand>(), Ok(RelayCommand::Listen));
        assert_eq!(
            "POWER".parse::<RelayCommand>(),
            Err(EnvelopeError::UnknownCommand("POWER".to_string()))
        );
    }
}
