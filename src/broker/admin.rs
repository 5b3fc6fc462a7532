use super::{AdminLink, BrokerBackend, Connection, ConnectionState, DEFAULT_BASE_DELAY};
use crate::config::BrokerClientConfig;
use crate::domain::BrokerError;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_PARTITIONS: u32 = 3;
pub const DEFAULT_REPLICATION_FACTOR: u16 = 1;

/// Topic administration. Not on any hot path: every failure is returned
/// as-is.
#[derive(Clone, Debug)]
pub struct Admin {
    conn: Arc<Connection<dyn AdminLink>>,
}

impl Admin {
    pub fn new(backend: &dyn BrokerBackend, config: &BrokerClientConfig) -> Self {
        Self::with_backoff(backend, config, DEFAULT_BASE_DELAY)
    }

    pub fn with_backoff(
        backend: &dyn BrokerBackend,
        config: &BrokerClientConfig,
        base_delay: Duration,
    ) -> Self {
        let conn = Connection::new("admin", backend.admin_link(config)).with_base_delay(base_delay);
        Self {
            conn: Arc::new(conn),
        }
    }

    pub async fn connect(&self, max_retries: u32) -> Result<(), BrokerError> {
        self.conn.connect(max_retries).await
    }

    pub async fn disconnect(&self) -> Result<bool, BrokerError> {
        self.conn.disconnect().await
    }

    pub async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<(), BrokerError> {
        if !self.conn.is_connected() {
            return Err(BrokerError::NotConnected("admin"));
        }
        if partitions == 0 {
            return Err(BrokerError::Admin(format!(
                "topic '{topic}' needs at least one partition"
            )));
        }

        match self
            .conn
            .link()
            .create_topic(topic, partitions, replication_factor)
            .await
        {
            Ok(()) => {
                info!(topic, partitions, replication_factor, "[admin] Topic created");
                Ok(())
            }
            Err(e) => {
                error!(topic, "[admin] Failed to create topic: {e}");
                Err(e)
            }
        }
    }

    pub async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        if !self.conn.is_connected() {
            return Err(BrokerError::NotConnected("admin"));
        }

        match self.conn.link().list_topics().await {
            Ok(topics) => {
                info!(count = topics.len(), "[admin] Topics listed");
                Ok(topics)
            }
            Err(e) => {
                error!("[admin] Failed to list topics: {e}");
                Err(e)
            }
        }
    }

    pub fn register_shutdown(&self, coordinator: &ShutdownCoordinator) -> bool {
        let conn = self.conn.clone();
        coordinator.register(format!("admin:{}", self.conn.id()), move || async move {
            if let Err(e) = conn.disconnect().await {
                error!("[admin] Disconnect during shutdown failed: {e}");
            }
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    fn admin(broker: &MemoryBroker) -> Admin {
        Admin::new(broker, &BrokerClientConfig::parse("admin", "localhost:9092").unwrap())
    }

    #[tokio::test]
    async fn test_create_and_list_topics() {
        let broker = MemoryBroker::new();
        let admin = admin(&broker);
        admin.connect(1).await.unwrap();

        admin
            .create_topic("orders", DEFAULT_PARTITIONS, DEFAULT_REPLICATION_FACTOR)
            .await
            .unwrap();
        admin.create_topic("audit", 1, 1).await.unwrap();

        assert_eq!(admin.list_topics().await.unwrap(), ["audit", "orders"]);
    }

    #[tokio::test]
    async fn test_duplicate_topic_propagates() {
        let broker = MemoryBroker::new();
        let admin = admin(&broker);
        admin.connect(1).await.unwrap();
        admin.create_topic("orders", 1, 1).await.unwrap();

        assert!(matches!(
            admin.create_topic("orders", 1, 1).await,
            Err(BrokerError::TopicExists(t)) if t == "orders"
        ));
    }

    #[tokio::test]
    async fn test_list_topics_unreachable_propagates() {
        let broker = MemoryBroker::new();
        let admin = admin(&broker);
        admin.connect(1).await.unwrap();
        broker.set_reachable(false);
        assert!(admin.list_topics().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fails_when_unreachable() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let admin = admin(&broker);

        let err = admin.connect(2).await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectFailed { attempts: 2, .. }));
        assert_eq!(admin.state(), ConnectionState::Disconnected);
    }
}
