/*!
Test Harness pour le publisher IDAT

Assemble un `MockBroker`, l'état de contrôle partagé et son listener, puis
fournit des assertions sur les valeurs publiées par topic.
*/

use anyhow::Result;
use idat_meter::{ControlListener, ControlState, MetricGenerator, PublishLoop, CONTROL_TOPIC};
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::mqtt_stub::MockBroker;

pub struct TestHarness {
    pub broker: MockBroker,
    pub control: ControlState,
    pub listener: Arc<ControlListener>,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let control = ControlState::new();
        Self {
            broker: MockBroker::new(),
            listener: Arc::new(ControlListener::new(control.clone())),
            control,
        }
    }

    /// Publish loop wired to the harness broker and control state.
    pub fn publish_loop(&self, seed: u64) -> PublishLoop<MockBroker, StdRng> {
        PublishLoop::new(self.broker.clone(), self.control.clone(), MetricGenerator::seeded(seed))
    }

    /// Simule un CONNACK du broker.
    pub fn connect(&self) -> Vec<String> {
        self.broker.simulate_connected(self.listener.as_ref())
    }

    /// Simule une commande sur le topic de contrôle.
    pub fn send_control(&self, payload: &str) {
        self.broker.simulate_incoming(self.listener.as_ref(), CONTROL_TOPIC, payload);
    }

    pub fn assert_last_payload(&self, topic: &str, expected: &str) -> Result<()> {
        match self.broker.last_payload(topic) {
            Some(actual) if actual == expected => {
                log::info!("✅ {} = {}", topic, actual);
                Ok(())
            }
            Some(actual) => anyhow::bail!(
                "Payload mismatch on {}: expected {}, got {}",
                topic,
                expected,
                actual
            ),
            None => anyhow::bail!("No message published on {}", topic),
        }
    }

    pub fn assert_message_count(&self, topic: &str, expected: usize) -> Result<()> {
        let actual = self.broker.find_messages_by_topic(topic).len();
        if actual != expected {
            anyhow::bail!(
                "Expectation failed for topic '{}': expected {} messages, got {}",
                topic, expected, actual
            );
        }
        Ok(())
    }

    /// Stats sur les messages collectés
    pub fn get_stats(&self) -> TestStats {
        let messages = self.broker.get_published_messages();
        let mut topic_counts = HashMap::new();

        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.broker.get_subscriptions(),
            disconnects: self.broker.disconnect_count(),
        }
    }

    pub fn reset(&self) {
        self.broker.clear();
        log::info!("🧹 Test harness reset");
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
    pub disconnects: usize,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Test Statistics:");
        println!("  Total messages: {}", self.total_messages);
        println!("  Topics with messages:");
        for (topic, count) in &self.topic_counts {
            println!("    {}: {} messages", topic, count);
        }
        println!("  Subscriptions: {:?}", self.subscriptions);
        println!("  Disconnects: {}", self.disconnects);
    }
}
