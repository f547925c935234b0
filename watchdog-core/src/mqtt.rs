//! rumqttc-backed [`CommandRelay`]
//!
//! `connect` drives the event loop until the broker answers CONNACK, so
//! refused and unauthorized sessions surface as distinct errors before any
//! command is attempted. After that the event loop runs on its own task and
//! routes status publishes into per-topic queues.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::envelope::CommandEnvelope;
use crate::error::RelayError;
use crate::identity::WatchdogIdentity;
use crate::relay::{BrokerCredentials, CommandRelay, PublishOutcome, SessionOptions, STATUS_QUEUE_CAPACITY};
use crate::status::StatusMessage;

type Subscribers = Arc<Mutex<HashMap<String, mpsc::Sender<StatusMessage>>>>;

/// How long `close` waits for the DISCONNECT packet to be flushed
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct MqttRelay {
    endpoint: String,
    client: AsyncClient,
    subscribers: Subscribers,
    shutdown: CancellationToken,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttRelay {
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: Option<&BrokerCredentials>,
        options: &SessionOptions,
    ) -> Result<Self, RelayError> {
        let endpoint = format!("{}:{}", host, port);

        let mut mqtt_options = MqttOptions::new(&options.client_id, host, port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some(credentials) = credentials {
            mqtt_options.set_credentials(
                &credentials.username,
                credentials.password.as_deref().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);

        info!("Connecting to MQTT broker {}...", endpoint);
        match tokio::time::timeout(options.connect_timeout, wait_for_connack(&mut eventloop, &endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RelayError::ConnectionRefused {
                    endpoint,
                    reason: format!("no CONNACK within {:?}", options.connect_timeout),
                })
            }
        }
        info!("Connected to MQTT broker {}", endpoint);

        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let event_task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            subscribers.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            endpoint,
            client,
            subscribers,
            shutdown,
            event_task: Mutex::new(Some(event_task)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop, endpoint: &str) -> Result<(), RelayError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => return classify_connack(ack.code, endpoint),
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => return classify_connack(code, endpoint),
            Err(e) => {
                return Err(RelayError::ConnectionRefused {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn classify_connack(code: ConnectReturnCode, endpoint: &str) -> Result<(), RelayError> {
    match code {
        ConnectReturnCode::Success => Ok(()),
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            Err(RelayError::AuthRejected {
                endpoint: endpoint.to_string(),
            })
        }
        other => Err(RelayError::ConnectionRefused {
            endpoint: endpoint.to_string(),
            reason: format!("{:?}", other),
        }),
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscribers: Subscribers,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    route_publish(&subscribers, &publish.topic, &publish.payload).await;
                }
                // The first CONNACK is consumed by `connect`, so this is a reconnect
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    let topics = resubscribe(&client, &subscribers);
                    info!("Reconnected to MQTT broker, restored {} subscription(s)", topics.len());
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}

/// Re-request every live status subscription after a clean-session
/// reconnect. Subscribers whose consumer has gone away are dropped.
///
/// Uses `try_subscribe` since this runs on the event loop task itself, which
/// is not polling while the requests are queued.
fn resubscribe(client: &AsyncClient, subscribers: &Subscribers) -> Vec<String> {
    let mut subscribers = subscribers.lock();
    subscribers.retain(|_, sender| !sender.is_closed());

    let mut topics: Vec<String> = subscribers.keys().cloned().collect();
    topics.sort();
    topics.retain(|topic| match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to restore subscription to {}: {}", topic, e);
            false
        }
    });
    topics
}

async fn route_publish(subscribers: &Subscribers, topic: &str, payload: &[u8]) {
    let sender = subscribers.lock().get(topic).cloned();
    match sender {
        Some(tx) => {
            if tx.send(StatusMessage::from_publish(topic, payload)).await.is_err() {
                debug!("Status consumer for {} went away", topic);
                subscribers.lock().remove(topic);
            }
        }
        None => debug!("Ignoring message on unsubscribed topic {}", topic),
    }
}

#[async_trait]
impl CommandRelay for MqttRelay {
    async fn publish(
        &self,
        identity: &WatchdogIdentity,
        envelope: &CommandEnvelope,
    ) -> Result<PublishOutcome, RelayError> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::SessionClosed);
        }
        let topic = identity.command_topic();
        let payload = envelope.encode()?;

        match self.client.publish(topic.as_str(), QoS::AtLeastOnce, false, payload).await {
            Ok(()) => {
                info!("Published {} command to {}", envelope.cmd(), topic);
                Ok(PublishOutcome::Success)
            }
            Err(e) => {
                warn!("Publish to {} rejected: {}", topic, e);
                Ok(PublishOutcome::Rejected { reason: e.to_string() })
            }
        }
    }

    async fn subscribe(&self, identity: &WatchdogIdentity) -> Result<mpsc::Receiver<StatusMessage>, RelayError> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::SessionClosed);
        }
        let topic = identity.status_topic();
        let (tx, rx) = mpsc::channel(STATUS_QUEUE_CAPACITY);
        self.subscribers.lock().insert(topic.clone(), tx);

        if let Err(e) = self.client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
            self.subscribers.lock().remove(&topic);
            error!("Failed to subscribe to {}: {}", topic, e);
            return Err(RelayError::SessionClosed);
        }
        info!("Subscribed to {}", topic);
        Ok(rx)
    }

    async fn close(&self) -> Result<(), RelayError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }

        let task = self.event_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                warn!("MQTT event loop did not stop after disconnect, aborting it");
                task.abort();
            }
        }
        self.shutdown.cancel();
        self.subscribers.lock().clear();
        info!("Disconnected from MQTT broker {}", self.endpoint);
        Ok(())
    }
}

impl Drop for MqttRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}
