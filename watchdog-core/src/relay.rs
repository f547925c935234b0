//! Broker-facing side of the command protocol

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::envelope::CommandEnvelope;
use crate::error::RelayError;
use crate::identity::WatchdogIdentity;
use crate::status::StatusMessage;

/// Status messages buffered between the network task and the consumer.
/// When full the network task waits instead of dropping.
pub const STATUS_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Success,
    /// The session is up but this publish was refused. Reported, not retried.
    Rejected { reason: String },
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Success)
    }
}

#[derive(Clone)]
pub struct BrokerCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// MQTT client id of this tool, not the watchdog identity
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_id: "watchdog-control".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connected relay session.
///
/// Status messages are handed over through the returned queue, so consumers
/// never share state with the network task that receives them.
#[async_trait]
pub trait CommandRelay: Send + Sync {
    /// Publish `envelope` on the identity's command topic
    async fn publish(
        &self,
        identity: &WatchdogIdentity,
        envelope: &CommandEnvelope,
    ) -> Result<PublishOutcome, RelayError>;

    /// Subscribe to the identity's status topic
    async fn subscribe(&self, identity: &WatchdogIdentity) -> Result<mpsc::Receiver<StatusMessage>, RelayError>;

    /// Release the session. Safe to call more than once.
    async fn close(&self) -> Result<(), RelayError>;
}
