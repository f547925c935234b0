/*!
Test harness for the command relay path

- Mock relay and identity set up in one place
- Expectations on how many commands reach the command topic
- Status injection on the watchdog's status topic
*/

use crate::mqtt_stub::MockRelay;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use watchdog_core::WatchdogIdentity;

pub struct TestHarness {
    pub relay: MockRelay,
    pub identity: WatchdogIdentity,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            relay: MockRelay::new(),
            identity: WatchdogIdentity::default(),
            expectations: Vec::new(),
        }
    }

    pub fn with_relay(mut self, relay: MockRelay) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_identity(mut self, identity: WatchdogIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Expect exactly `count` commands on this identity's command topic
    pub fn expect_commands(&mut self, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: self.identity.command_topic(),
            expected_count: count,
        });
        self
    }

    /// Publish a status as the watchdog would. Returns false if nobody
    /// was subscribed.
    pub async fn send_status(&self, payload: impl AsRef<[u8]>) -> Result<bool> {
        self.relay.simulate_status(&self.identity.status_topic(), payload).await
    }

    pub async fn send_device_status(&self, uptime: u64) -> Result<bool> {
        let payload = serde_json::json!({
            "status": "online",
            "uptime": uptime,
            "ip": "192.168.1.50",
            "rssi": -61,
        });
        self.send_status(serde_json::to_vec(&payload)?).await
    }

    /// Poll until the code under test has subscribed
    pub async fn wait_for_subscription(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            while !self.relay.is_subscribed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("No subscription on {} within {:?}", self.identity.status_topic(), timeout))?;
        log::info!("✅ Subscribed to {}", self.identity.status_topic());
        Ok(())
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.relay.find_messages_by_topic(&expectation.topic).len();
            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual_count
                );
            }
        }
        Ok(())
    }

    /// Assert a command with this exact JSON was published
    pub fn assert_command_sent(&self, expected_payload: &Value) -> Result<()> {
        let topic = self.identity.command_topic();
        for msg in self.relay.find_messages_by_topic(&topic) {
            let payload: Value = serde_json::from_slice(&msg.payload)?;
            if payload == *expected_payload {
                return Ok(());
            }
        }
        anyhow::bail!("Expected command not found on topic: {}", topic);
    }

    pub fn stats(&self) -> TestStats {
        let messages = self.relay.published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.relay.subscriptions(),
            closes: self.relay.close_count(),
        }
    }

    pub fn reset(&mut self) {
        self.relay.clear();
        self.expectations.clear();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
    pub closes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_core::{CommandEnvelope, CommandRelay, PowerAction};

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new();
        harness.expect_commands(1);

        let envelope = CommandEnvelope::new(PowerAction::Power, Some(300)).unwrap();
        harness.relay.publish(&harness.identity, &envelope).await.unwrap();

        harness.verify_expectations().unwrap();
        harness
            .assert_command_sent(&serde_json::json!({"cmd": "power", "duration": 300}))
            .unwrap();
        assert!(harness
            .assert_command_sent(&serde_json::json!({"cmd": "reset"}))
            .is_err());

        let stats = harness.stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.topic_counts["/watchdog/watchdog-001/cmd"], 1);

        harness.reset();
        harness.verify_expectations().unwrap();
        assert_eq!(harness.stats().total_messages, 0);
        assert_eq!(harness.relay.last_json_message("/watchdog/watchdog-001/cmd").unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_without_subscriber_is_not_delivered() {
        let harness = TestHarness::new();
        assert!(!harness.send_status("busy").await.unwrap());
        assert!(harness.wait_for_subscription(Duration::from_millis(50)).await.is_err());
    }
}
