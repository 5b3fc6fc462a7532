//! Broker client primitives.
//!
//! `Producer`, `Consumer` and `Admin` share one connection lifecycle
//! (`Connection`) and reach the broker through backend links. Two backends
//! exist: the in-process `MemoryBroker` and, behind the `kafka` feature,
//! `KafkaBackend`.

pub mod admin;
pub mod connection;
pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod producer;

pub use admin::Admin;
pub use connection::{Connection, ConnectionState, DEFAULT_BASE_DELAY, DEFAULT_CONNECT_RETRIES};
pub use consumer::{Consumer, ConsumerOptions};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBackend;
pub use memory::MemoryBroker;
pub use producer::Producer;

use crate::config::BrokerClientConfig;
use crate::domain::BrokerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One message handed to `Producer::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub key: Option<String>,
    pub value: String,
    /// Epoch milliseconds as a decimal string.
    pub timestamp: Option<String>,
}

impl BrokerMessage {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: value.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// A message delivered to a consumer handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub value: Option<String>,
    pub timestamp: Option<String>,
}

/// Raw network handle behind a connection. `open`/`close` are called by
/// `Connection` only, never concurrently with each other.
#[async_trait]
pub trait Link: Send + Sync {
    async fn open(&self) -> Result<(), BrokerError>;
    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait ProducerLink: Link {
    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait ConsumerLink: Link {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time.
    async fn poll(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError>;
}

#[async_trait]
pub trait AdminLink: Link {
    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<(), BrokerError>;

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;
}

/// Factory for role-specific links.
pub trait BrokerBackend: Send + Sync {
    fn producer_link(&self, config: &BrokerClientConfig) -> Arc<dyn ProducerLink>;

    fn consumer_link(&self, config: &BrokerClientConfig, group_id: &str) -> Arc<dyn ConsumerLink>;

    fn admin_link(&self, config: &BrokerClientConfig) -> Arc<dyn AdminLink>;
}

/// Backend used when the caller does not pick one. Only a build with the
/// `kafka` feature has one; the in-memory broker is never picked implicitly.
pub fn default_backend() -> Option<Arc<dyn BrokerBackend>> {
    #[cfg(feature = "kafka")]
    {
        Some(Arc::new(KafkaBackend::default()))
    }
    #[cfg(not(feature = "kafka"))]
    {
        None
    }
}
