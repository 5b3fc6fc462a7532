use super::FALLBACK_TARGET;
use crate::broker::{BrokerBackend, BrokerMessage, Producer};
use crate::config::BrokerSinkConfig;
use crate::domain::{BrokerError, ConfigError, RenderedEntry};
use std::slice;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Outcome of shipping one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    Dropped { attempts: u32 },
}

/// Ships log entries to a topic over one owned producer connection.
///
/// Delivery is best-effort: `retry_attempts` retries with a fixed
/// `retry_delay` between them, after which the entry is dropped and the drop
/// reported on the fallback channel.
#[derive(Debug)]
pub struct BrokerTransport {
    producer: Producer,
    topic: String,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl BrokerTransport {
    pub fn new(
        backend: &dyn BrokerBackend,
        config: &BrokerSinkConfig,
    ) -> Result<Self, ConfigError> {
        let client = config.client_config()?;
        Ok(Self::from_producer(
            Producer::new(backend, &client),
            &config.topic,
            config.retry_attempts,
            config.retry_delay,
        ))
    }

    pub fn from_producer(
        producer: Producer,
        topic: impl Into<String>,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            retry_attempts,
            retry_delay,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Key is the emitting service, value the entry's JSON, timestamp the
    /// entry time in epoch milliseconds.
    pub fn message_for(entry: &RenderedEntry) -> BrokerMessage {
        BrokerMessage::new(entry.json.clone())
            .with_key(entry.entry.service.clone())
            .with_timestamp(entry.entry.epoch_millis())
    }

    /// Open the producer connection unless it is already open.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.producer.connect(1).await
    }

    pub async fn disconnect(&self) -> Result<bool, BrokerError> {
        self.producer.disconnect().await
    }

    async fn attempt(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        if !self.producer.is_connected() {
            self.connect().await?;
        }
        self.producer
            .send(&self.topic, slice::from_ref(message))
            .await
    }

    /// Deliver one entry. Never fails: exhaustion drops the entry.
    pub async fn send(&self, entry: &RenderedEntry) -> Delivery {
        let message = Self::message_for(entry);
        let max_attempts = self.retry_attempts.saturating_add(1);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(&message).await {
                Ok(()) => {
                    debug!(topic = %self.topic, attempts, "Log entry shipped");
                    return Delivery::Delivered { attempts };
                }
                Err(e) if attempts >= max_attempts => {
                    error!(
                        target: FALLBACK_TARGET,
                        topic = %self.topic,
                        service = %entry.entry.service,
                        attempts,
                        "Failed to send log to broker after {attempts} attempt(s), dropping entry: {e}"
                    );
                    return Delivery::Dropped { attempts };
                }
                Err(e) => {
                    warn!(
                        topic = %self.topic,
                        attempt = attempts,
                        max_attempts,
                        "Broker send failed, retrying in {:?}: {e}",
                        self.retry_delay
                    );
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
