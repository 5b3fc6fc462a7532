use super::{
    BrokerBackend, BrokerMessage, Connection, ConnectionState, DEFAULT_BASE_DELAY, ProducerLink,
};
use crate::config::BrokerClientConfig;
use crate::domain::BrokerError;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Publishes messages to topics. Cheap to clone; clones share one
/// connection.
#[derive(Clone, Debug)]
pub struct Producer {
    conn: Arc<Connection<dyn ProducerLink>>,
    client_id: String,
}

impl Producer {
    pub fn new(backend: &dyn BrokerBackend, config: &BrokerClientConfig) -> Self {
        Self::with_backoff(backend, config, DEFAULT_BASE_DELAY)
    }

    /// Like `new`, with a custom connect backoff unit.
    pub fn with_backoff(
        backend: &dyn BrokerBackend,
        config: &BrokerClientConfig,
        base_delay: Duration,
    ) -> Self {
        let conn = Connection::new("producer", backend.producer_link(config))
            .with_base_delay(base_delay);
        Self {
            conn: Arc::new(conn),
            client_id: config.client_id().to_string(),
        }
    }

    pub async fn connect(&self, max_retries: u32) -> Result<(), BrokerError> {
        self.conn.connect(max_retries).await
    }

    pub async fn disconnect(&self) -> Result<bool, BrokerError> {
        self.conn.disconnect().await
    }

    /// Single delivery attempt. Retrying is the caller's business.
    pub async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        if !self.conn.is_connected() {
            return Err(BrokerError::NotConnected("producer"));
        }

        match self.conn.link().send(topic, messages).await {
            Ok(()) => {
                debug!(topic, count = messages.len(), "[producer] Message sent");
                Ok(())
            }
            Err(e) => {
                error!(topic, "[producer] Failed to send message: {e}");
                Err(e)
            }
        }
    }

    /// Register a disconnect hook. Re-registering the same producer is a
    /// no-op.
    pub fn register_shutdown(&self, coordinator: &ShutdownCoordinator) -> bool {
        let conn = self.conn.clone();
        coordinator.register(format!("producer:{}", self.conn.id()), move || async move {
            if let Err(e) = conn.disconnect().await {
                error!("[producer] Disconnect during shutdown failed: {e}");
            }
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn id(&self) -> &str {
        self.conn.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }
}
