//! ATX Watchdog core - host side of the watchdog supervision protocol
//!
//! Two independent paths drive the same physical watchdog:
//! - Keepalive: a serial `KEEPALIVE` -> `ACK` exchange paced by [`KeepaliveTimer`]
//!   and driven by [`KeepaliveSupervisor`]
//! - Command relay: `power`/`reset` envelopes published to a broker through a
//!   [`CommandRelay`], with status messages flowing back on the status topic
//!
//! [`FirmwareWatchdog`] models the device end of both protocols.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod firmware;
pub mod identity;
pub mod keepalive;
pub mod link;
pub mod mqtt;
pub mod relay;
pub mod serial;
pub mod status;
pub mod supervision;

pub use config::{BrokerConfig, SerialConfig, WatchdogConfig};
pub use dispatch::{CommandDispatch, DispatchOutcome};
pub use envelope::{CommandEnvelope, PowerAction, RelayCommand};
pub use error::{ConfigError, EnvelopeError, IdentityError, LinkUnavailable, RelayError};
pub use firmware::{ButtonPress, FirmwareSettings, FirmwareWatchdog};
pub use identity::WatchdogIdentity;
pub use keepalive::{KeepaliveState, KeepaliveTimer, LinkResult};
pub use link::{LineTransport, SerialLinkChannel};
pub use mqtt::MqttRelay;
pub use relay::{BrokerCredentials, CommandRelay, PublishOutcome, SessionOptions};
pub use serial::{available_endpoints, SerialTransport};
pub use status::{DeviceStatus, RawText, StatusMessage, StatusPayload};
pub use supervision::{KeepalivePhase, KeepaliveReport, KeepaliveSnapshot, KeepaliveSupervisor};
