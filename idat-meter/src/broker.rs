//! MQTT broker client
//!
//! [`BrokerClient`] is the narrow surface the publish loop needs. [`MqttBroker`]
//! implements it over `rumqttc`: a background driver task polls the event loop,
//! forwards connections and control messages to a [`MessageHandler`], and
//! reports link health back through a watch channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::control::MessageHandler;
use crate::error::BrokerError;

/// Capacity of the request queue between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 32;
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Resolve once the broker has accepted the connection.
    async fn wait_connected(&self) -> Result<(), BrokerError>;

    /// Queue one telemetry value. Must not block on the network.
    fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;

    /// Release the connection. Safe to call more than once.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Link status as seen by the driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed(String),
}

pub struct MqttBroker {
    client: AsyncClient,
    status: watch::Receiver<LinkStatus>,
    driver: Mutex<Option<JoinHandle<()>>>,
    endpoint: String,
    connect_timeout: Duration,
}

impl MqttBroker {
    /// Spawn the MQTT driver. Must be called from within a tokio runtime.
    pub fn start(config: &MqttConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let client_id = config.client_id();
        let mut options = MqttOptions::new(&client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (status_tx, status) = watch::channel(LinkStatus::Connecting);

        info!("Connecting to MQTT broker {} as {}", config.endpoint(), client_id);
        let driver = tokio::spawn(drive(eventloop, client.clone(), handler, status_tx));

        Self {
            client,
            status,
            driver: Mutex::new(Some(driver)),
            endpoint: config.endpoint(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    fn driver_alive(&self) -> bool {
        self.driver
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn wait_connected(&self) -> Result<(), BrokerError> {
        let mut status = self.status.clone();
        let wait = async move {
            loop {
                let current = status.borrow_and_update().clone();
                match current {
                    LinkStatus::Connected => return Ok(()),
                    LinkStatus::Failed(reason) => return Err(reason),
                    _ => {}
                }
                if status.changed().await.is_err() {
                    return Err("MQTT driver stopped before connecting".to_string());
                }
            }
        };

        match tokio::time::timeout(self.connect_timeout, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(BrokerError::Connection {
                endpoint: self.endpoint.clone(),
                reason,
            }),
            Err(_) => Err(BrokerError::Connection {
                endpoint: self.endpoint.clone(),
                reason: format!("no CONNACK within {}s", self.connect_timeout.as_secs()),
            }),
        }
    }

    fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        if let LinkStatus::Failed(reason) = self.status() {
            return Err(BrokerError::Fatal(reason));
        }
        if !self.driver_alive() {
            return Err(BrokerError::Fatal("MQTT driver task is not running".into()));
        }
        // Nothing is queued while the link is down, so the request queue
        // stays free for the SUBSCRIBE sent on reconnection.
        if self.status() != LinkStatus::Connected {
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "not connected to broker".into(),
            });
        }

        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let driver = self.driver.lock().take();
        let Some(mut handle) = driver else {
            return Ok(());
        };

        let result = self
            .client
            .try_disconnect()
            .map_err(|e| BrokerError::Fatal(e.to_string()));

        // Let the driver flush DISCONNECT before tearing it down
        if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
            debug!("MQTT driver did not stop in time, aborting");
            handle.abort();
        }

        result
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
    }
}

/// Poll the event loop until the broker refuses us or we disconnect.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    handler: Arc<dyn MessageHandler>,
    status: watch::Sender<LinkStatus>,
) {
    // Topics whose SUBSCRIBE could not be queued yet on this connection
    let mut pending: Vec<String> = Vec::new();

    loop {
        if !pending.is_empty() && *status.borrow() == LinkStatus::Connected {
            subscribe_pending(&client, &mut pending);
        }

        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("✅ Connected to MQTT broker");
                pending = handler.on_connected();
                subscribe_pending(&client, &mut pending);
                status.send_replace(LinkStatus::Connected);
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                debug!("Received MQTT message on topic: {}", publish.topic);
                handler.on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from broker");
                status.send_replace(LinkStatus::Disconnected);
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                error!("❌ Broker refused the connection: {:?}", code);
                status.send_replace(LinkStatus::Failed(format!("connection refused: {code:?}")));
                break;
            }
            Err(ConnectionError::RequestsDone) => {
                status.send_replace(LinkStatus::Disconnected);
                break;
            }
            Err(e) => {
                warn!("⚠️ MQTT connection error: {}. Reconnecting...", e);
                pending.clear();
                if *status.borrow() == LinkStatus::Connected {
                    status.send_replace(LinkStatus::Reconnecting);
                }
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }
}

/// Queue a SUBSCRIBE for each pending topic. Topics rejected by a full
/// request queue stay pending and are retried after the next event.
fn subscribe_pending(client: &AsyncClient, pending: &mut Vec<String>) {
    pending.retain(|topic| match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
        Ok(()) => {
            info!("📡 Subscribed to control topic: {}", topic);
            false
        }
        Err(e) => {
            warn!("Subscription to {} deferred: {}", topic, e);
            true
        }
    });
}
