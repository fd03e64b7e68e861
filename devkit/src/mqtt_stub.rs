/*!
Broker MQTT simulé pour tests sans réseau

Implémente `BrokerClient` : enregistre toutes les publications, rejoue les
callbacks de connexion/message vers un `MessageHandler`, et permet d'injecter
des pannes (connexion refusée, topic en échec, transport perdu).
*/

use async_trait::async_trait;
use idat_meter::{BrokerClient, BrokerError, MessageHandler};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Default)]
struct MockState {
    published: Mutex<Vec<MockMessage>>,
    subscriptions: Mutex<Vec<String>>,
    failing_topics: Mutex<HashSet<String>>,
    connect_error: Mutex<Option<String>>,
    fatal_after: Mutex<Option<usize>>,
    disconnects: AtomicUsize,
}

/// Mock broker; clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `wait_connected` fail with `reason`.
    pub fn refuse_connection<S: Into<String>>(&self, reason: S) {
        *self.state.connect_error.lock() = Some(reason.into());
    }

    /// Reject every publish on `topic` with a non-fatal error.
    pub fn fail_topic<S: Into<String>>(&self, topic: S) {
        self.state.failing_topics.lock().insert(topic.into());
    }

    /// Report a fatal transport error once `count` messages went out.
    pub fn fatal_after(&self, count: usize) {
        *self.state.fatal_after.lock() = Some(count);
    }

    /// Replay a broker CONNACK: lets the handler reset and records its subscriptions.
    pub fn simulate_connected(&self, handler: &dyn MessageHandler) -> Vec<String> {
        let topics = handler.on_connected();
        self.state.subscriptions.lock().extend(topics.iter().cloned());
        log::info!("📥 [MOCK] Connected, subscribed to {:?}", topics);
        topics
    }

    /// Deliver a message to the handler as the network task would.
    pub fn simulate_incoming(&self, handler: &dyn MessageHandler, topic: &str, payload: &str) {
        log::info!("📨 [MOCK] Simulated incoming on {}: {:?}", topic, payload);
        handler.on_message(topic, payload.as_bytes());
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.state.published.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.find_messages_by_topic(topic)
            .into_iter()
            .map(|msg| msg.payload)
            .collect()
    }

    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.payloads_for(topic).pop()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Reset recorded messages and subscriptions; injected failures stay.
    pub fn clear(&self) {
        self.state.published.lock().clear();
        self.state.subscriptions.lock().clear();
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn wait_connected(&self) -> Result<(), BrokerError> {
        match self.state.connect_error.lock().clone() {
            Some(reason) => Err(BrokerError::Connection {
                endpoint: "mock".into(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        let mut published = self.state.published.lock();

        if let Some(limit) = *self.state.fatal_after.lock() {
            if published.len() >= limit {
                return Err(BrokerError::Fatal("mock transport closed".into()));
            }
        }

        if self.state.failing_topics.lock().contains(topic) {
            log::warn!("📤 [MOCK] Rejected publish to {}", topic);
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "mock rejection".into(),
            });
        }

        log::info!("📤 [MOCK] Published to {}: {}", topic, payload);
        published.push(MockMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        log::info!("🔌 [MOCK] Disconnected");
        Ok(())
    }
}
