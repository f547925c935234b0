//! Device end of the protocols, as the ESP8266 firmware implements them
//!
//! The host never runs this in production. It pins down what the host talks
//! to: which lines get acknowledged, when the watchdog fires, and how a
//! command payload turns into a button press. The devkit's simulated devices
//! are built on it.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::envelope::PowerAction;
use crate::link::{ACK_TOKEN, KEEPALIVE_TOKEN};

/// Alternate keepalive spelling the firmware also accepts
pub const PING_TOKEN: &str = "PING";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSettings {
    pub power_click_ms: u32,
    pub reset_click_ms: u32,
    pub watchdog_timeout: Duration,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            power_click_ms: 200,
            reset_click_ms: 200,
            watchdog_timeout: Duration::from_secs(120),
        }
    }
}

/// A GPIO pulse on the power or reset header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPress {
    pub action: PowerAction,
    pub duration_ms: u32,
}

#[derive(Debug, Clone)]
pub struct FirmwareWatchdog {
    settings: FirmwareSettings,
    last_keepalive: Option<Instant>,
    armed: bool,
}

impl FirmwareWatchdog {
    pub fn new(settings: FirmwareSettings) -> Self {
        Self {
            settings,
            last_keepalive: None,
            armed: false,
        }
    }

    pub fn settings(&self) -> &FirmwareSettings {
        &self.settings
    }

    /// Disarmed until the first keepalive, and again after each trigger
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feed one serial line. Returns the reply line, if any.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Option<&'static str> {
        let line = line.trim();
        if line.starts_with(KEEPALIVE_TOKEN) || line.starts_with(PING_TOKEN) {
            self.last_keepalive = Some(now);
            self.armed = true;
            Some(ACK_TOKEN)
        } else {
            None
        }
    }

    /// Check the timeout. Fires at most once per armed period: the watchdog
    /// disarms itself after pressing power and waits for a new keepalive.
    pub fn poll(&mut self, now: Instant) -> Option<ButtonPress> {
        let last = self.last_keepalive?;
        if !self.armed || now.saturating_duration_since(last) <= self.settings.watchdog_timeout {
            return None;
        }
        self.armed = false;
        self.last_keepalive = Some(now);
        Some(ButtonPress {
            action: PowerAction::Power,
            duration_ms: self.settings.power_click_ms,
        })
    }

    /// Interpret a payload received on the command topic.
    ///
    /// Lenient like the firmware: an unusable duration falls back to the
    /// configured click length, unknown commands are ignored.
    pub fn handle_command(&self, payload: &[u8]) -> Option<ButtonPress> {
        let doc: Value = serde_json::from_slice(payload).ok()?;
        let action = match doc.get("cmd")?.as_str()? {
            "power" => PowerAction::Power,
            "reset" => PowerAction::Reset,
            _ => return None,
        };
        let default_ms = match action {
            PowerAction::Power => self.settings.power_click_ms,
            PowerAction::Reset => self.settings.reset_click_ms,
        };
        let duration_ms = doc
            .get("duration")
            .and_then(Value::as_u64)
            .and_then(|ms| u32::try_from(ms).ok())
            .unwrap_or(default_ms);
        Some(ButtonPress { action, duration_ms })
    }
}

impl Default for FirmwareWatchdog {
    fn default() -> Self {
        Self::new(FirmwareSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FirmwareSettings {
        FirmwareSettings {
            watchdog_timeout: Duration::from_secs(60),
            ..FirmwareSettings::default()
        }
    }

    #[test]
    fn test_keepalive_and_ping_are_acknowledged() {
        let mut wd = FirmwareWatchdog::new(settings());
        let now = Instant::now();
        assert!(!wd.is_armed());
        assert_eq!(wd.handle_line("KEEPALIVE\r\n", now), Some("ACK"));
        assert!(wd.is_armed());
        assert_eq!(wd.handle_line("PING", now), Some("ACK"));
        assert_eq!(wd.handle_line("hello", now), None);
    }

    #[test]
    fn test_never_fires_before_first_keepalive() {
        let mut wd = FirmwareWatchdog::new(settings());
        assert_eq!(wd.poll(Instant::now() + Duration::from_secs(3600)), None);
    }

    #[test]
    fn test_fires_once_then_waits_for_keepalive() {
        let mut wd = FirmwareWatchdog::new(settings());
        let start = Instant::now();
        wd.handle_line("KEEPALIVE", start);

        assert_eq!(wd.poll(start + Duration::from_secs(60)), None);
        let press = wd.poll(start + Duration::from_secs(61));
        assert_eq!(
            press,
            Some(ButtonPress {
                action: PowerAction::Power,
                duration_ms: 200
            })
        );
        assert!(!wd.is_armed());
        assert_eq!(wd.poll(start + Duration::from_secs(500)), None);

        // a new keepalive re-arms it
        wd.handle_line("KEEPALIVE", start + Duration::from_secs(600));
        assert!(wd.is_armed());
        assert!(wd.poll(start + Duration::from_secs(661)).is_some());
    }

    #[test]
    fn test_keepalives_hold_off_trigger() {
        let mut wd = FirmwareWatchdog::new(settings());
        let start = Instant::now();
        for i in 0..10 {
            let now = start + Duration::from_secs(30 * i);
            wd.handle_line("KEEPALIVE", now);
            assert_eq!(wd.poll(now + Duration::from_secs(29)), None);
        }
    }

    #[test]
    fn test_command_payloads() {
        let wd = FirmwareWatchdog::new(FirmwareSettings {
            power_click_ms: 250,
            reset_click_ms: 150,
            ..settings()
        });
        assert_eq!(
            wd.handle_command(br#"{"cmd":"power","duration":300}"#),
            Some(ButtonPress {
                action: PowerAction::Power,
                duration_ms: 300
            })
        );
        assert_eq!(
            wd.handle_command(br#"{"cmd":"reset"}"#),
            Some(ButtonPress {
                action: PowerAction::Reset,
                duration_ms: 150
            })
        );
        assert_eq!(
            wd.handle_command(br#"{"cmd":"power","duration":"long"}"#).map(|p| p.duration_ms),
            Some(250)
        );
        assert_eq!(wd.handle_command(br#"{"cmd":"shutdown"}"#), None);
        assert_eq!(wd.handle_command(br#"{"duration":300}"#), None);
        assert_eq!(wd.handle_command(b"busy"), None);
    }
}
