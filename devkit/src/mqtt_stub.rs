/*!
Mock command relay for development without a broker

Records every published command and lets tests push status messages back
through the same queue a real session would use. Can optionally run the
published payloads through a [`FirmwareWatchdog`] to see which button the
device would press.
*/

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use watchdog_core::relay::STATUS_QUEUE_CAPACITY;
use watchdog_core::{
    ButtonPress, CommandEnvelope, CommandRelay, FirmwareWatchdog, PublishOutcome, RelayError, StatusMessage,
    WatchdogIdentity,
};

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct Behaviour {
    reject_with: Option<String>,
    fail_subscribe: bool,
    auto_status: Option<Vec<u8>>,
    firmware: Option<FirmwareWatchdog>,
}

/// In-memory [`CommandRelay`]. Clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MockRelay {
    published: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    status_sender: Arc<Mutex<Option<(String, mpsc::Sender<StatusMessage>)>>>,
    behaviour: Arc<Mutex<Behaviour>>,
    presses: Arc<Mutex<Vec<ButtonPress>>>,
    closes: Arc<AtomicUsize>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish is refused with `reason`
    pub fn rejecting(self, reason: impl Into<String>) -> Self {
        self.behaviour.lock().reject_with = Some(reason.into());
        self
    }

    /// `subscribe` fails as if the session dropped
    pub fn failing_subscribe(self) -> Self {
        self.behaviour.lock().fail_subscribe = true;
        self
    }

    /// Answer every accepted publish with `payload` on the status topic
    pub fn with_auto_status(self, payload: impl Into<Vec<u8>>) -> Self {
        self.behaviour.lock().auto_status = Some(payload.into());
        self
    }

    /// Feed published commands to a simulated device
    pub fn with_firmware(self, firmware: FirmwareWatchdog) -> Self {
        self.behaviour.lock().firmware = Some(firmware);
        self
    }

    /// Push a status message to the current subscriber, if it listens on `topic`
    pub async fn simulate_status(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<bool> {
        let sender = match self.status_sender.lock().as_ref() {
            Some((subscribed, sender)) if subscribed == topic => sender.clone(),
            _ => {
                log::info!("📭 [MOCK] No subscriber on {}", topic);
                return Ok(false);
            }
        };
        sender
            .send(StatusMessage::from_publish(topic, payload.as_ref()))
            .await
            .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        log::info!("📨 [MOCK] Simulated status on {}", topic);
        Ok(true)
    }

    pub fn published_messages(&self) -> Vec<MockMessage> {
        self.published.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the last message published on `topic`
    pub fn last_json_message(&self, topic: &str) -> Result<Option<Value>> {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Presses the attached firmware performed, in order
    pub fn button_presses(&self) -> Vec<ButtonPress> {
        self.presses.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.status_sender.lock().is_some()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
        self.subscriptions.lock().clear();
        self.presses.lock().clear();
    }
}

#[async_trait]
impl CommandRelay for MockRelay {
    async fn publish(
        &self,
        identity: &WatchdogIdentity,
        envelope: &CommandEnvelope,
    ) -> Result<PublishOutcome, RelayError> {
        if self.close_count() > 0 {
            return Err(RelayError::SessionClosed);
        }
        let topic = identity.command_topic();
        let payload = envelope.encode()?;

        let auto_status = {
            let mut behaviour = self.behaviour.lock();
            if let Some(reason) = &behaviour.reject_with {
                log::info!("🚫 [MOCK] Rejected publish to {}", topic);
                return Ok(PublishOutcome::Rejected { reason: reason.clone() });
            }
            if let Some(press) = behaviour.firmware.as_mut().and_then(|fw| fw.handle_command(&payload)) {
                self.presses.lock().push(press);
            }
            behaviour.auto_status.clone()
        };

        log::info!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        self.published.lock().push(MockMessage { topic, payload });

        if let Some(status) = auto_status {
            // Nobody listening is fine, like a broker with no subscriber
            let _ = self.simulate_status(&identity.status_topic(), status).await;
        }
        Ok(PublishOutcome::Success)
    }

    async fn subscribe(&self, identity: &WatchdogIdentity) -> Result<mpsc::Receiver<StatusMessage>, RelayError> {
        if self.behaviour.lock().fail_subscribe || self.close_count() > 0 {
            return Err(RelayError::SessionClosed);
        }
        let topic = identity.status_topic();
        let (sender, receiver) = mpsc::channel(STATUS_QUEUE_CAPACITY);
        self.subscriptions.lock().push(topic.clone());
        *self.status_sender.lock() = Some((topic.clone(), sender));
        log::info!("📥 [MOCK] Subscribed to {}", topic);
        Ok(receiver)
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.status_sender.lock().take();
        log::info!("🔌 [MOCK] Session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_core::{PowerAction, StatusPayload};

    #[tokio::test]
    async fn test_publish_records_wire_payload() {
        let relay = MockRelay::new();
        let identity = WatchdogIdentity::default();
        let envelope = CommandEnvelope::new(PowerAction::Reset, None).unwrap();

        let outcome = relay.publish(&identity, &envelope).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Success);

        let messages = relay.find_messages_by_topic("/watchdog/watchdog-001/cmd");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, br#"{"cmd":"reset"}"#);
    }

    #[tokio::test]
    async fn test_status_reaches_subscriber() {
        let relay = MockRelay::new();
        let identity = WatchdogIdentity::default();
        let mut statuses = relay.subscribe(&identity).await.unwrap();

        assert!(relay.simulate_status(&identity.status_topic(), "busy").await.unwrap());
        assert!(!relay.simulate_status("/watchdog/other/status", "busy").await.unwrap());

        let message = statuses.recv().await.unwrap();
        assert_eq!(message.payload, StatusPayload::Raw("busy".to_string()));
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let relay = MockRelay::new();
        let identity = WatchdogIdentity::default();
        let mut statuses = relay.subscribe(&identity).await.unwrap();

        relay.close().await.unwrap();
        relay.close().await.unwrap();
        assert_eq!(relay.close_count(), 2);
        assert!(statuses.recv().await.is_none());

        let envelope = CommandEnvelope::new(PowerAction::Power, None).unwrap();
        assert!(matches!(
            relay.publish(&identity, &envelope).await,
            Err(RelayError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_firmware_sees_published_commands() {
        let relay = MockRelay::new().with_firmware(FirmwareWatchdog::default());
        let identity = WatchdogIdentity::default();

        let envelope = CommandEnvelope::new(PowerAction::Power, Some(4000)).unwrap();
        relay.publish(&identity, &envelope).await.unwrap();

        assert_eq!(
            relay.button_presses(),
            vec![ButtonPress {
                action: PowerAction::Power,
                duration_ms: 4000
            }]
        );
    }
}
