//! Kafka backend on top of librdkafka.

use super::{
    AdminLink, BrokerBackend, BrokerMessage, ConsumerLink, Link, ProducerLink, ReceivedMessage,
};
use crate::config::BrokerClientConfig;
use crate::domain::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::ClientConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::types::RDKafkaErrorCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct KafkaBackend {
    /// Bound on metadata lookups, flushes and enqueueing.
    pub request_timeout: Duration,
}

impl Default for KafkaBackend {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

fn base_config(config: &BrokerClientConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.brokers().join(","))
        .set("client.id", config.client_id());
    client
}

fn backend_err(e: KafkaError) -> BrokerError {
    BrokerError::Backend(e.to_string())
}

/// Fetch cluster metadata to prove the brokers answer.
async fn probe(config: ClientConfig, timeout: Duration) -> Result<Vec<String>, BrokerError> {
    tokio::task::spawn_blocking(move || {
        let consumer: BaseConsumer = config.create().map_err(backend_err)?;
        let metadata = consumer
            .fetch_metadata(None, timeout)
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;
        let mut topics: Vec<String> = metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        topics.sort();
        Ok(topics)
    })
    .await
    .map_err(|e| BrokerError::Backend(format!("metadata task failed: {e}")))?
}

impl BrokerBackend for KafkaBackend {
    fn producer_link(&self, config: &BrokerClientConfig) -> Arc<dyn ProducerLink> {
        Arc::new(KafkaProducerLink {
            config: base_config(config),
            timeout: self.request_timeout,
            producer: Mutex::new(None),
        })
    }

    fn consumer_link(&self, config: &BrokerClientConfig, group_id: &str) -> Arc<dyn ConsumerLink> {
        Arc::new(KafkaConsumerLink {
            config: base_config(config),
            group_id: group_id.to_string(),
            timeout: self.request_timeout,
            topics: Mutex::new(Vec::new()),
            consumer: Mutex::new(None),
        })
    }

    fn admin_link(&self, config: &BrokerClientConfig) -> Arc<dyn AdminLink> {
        Arc::new(KafkaAdminLink {
            config: base_config(config),
            timeout: self.request_timeout,
            admin: Mutex::new(None),
        })
    }
}

struct KafkaProducerLink {
    config: ClientConfig,
    timeout: Duration,
    producer: Mutex<Option<FutureProducer>>,
}

#[async_trait]
impl Link for KafkaProducerLink {
    async fn open(&self) -> Result<(), BrokerError> {
        probe(self.config.clone(), self.timeout).await?;
        let producer: FutureProducer = self.config.create().map_err(backend_err)?;
        *self.producer.lock() = Some(producer);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let Some(producer) = self.producer.lock().take() else {
            return Ok(());
        };
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Backend(format!("flush task failed: {e}")))?
            .map_err(backend_err)
    }
}

#[async_trait]
impl ProducerLink for KafkaProducerLink {
    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        let producer = self
            .producer
            .lock()
            .clone()
            .ok_or(BrokerError::NotConnected("producer"))?;

        for message in messages {
            let mut record = FutureRecord::<str, str>::to(topic).payload(message.value.as_str());
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }
            if let Some(ts) = message.timestamp.as_deref().and_then(|t| t.parse::<i64>().ok()) {
                record = record.timestamp(ts);
            }
            producer
                .send(record, self.timeout)
                .await
                .map_err(|(e, _)| BrokerError::Send {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

struct KafkaConsumerLink {
    config: ClientConfig,
    group_id: String,
    timeout: Duration,
    topics: Mutex<Vec<String>>,
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
}

#[async_trait]
impl Link for KafkaConsumerLink {
    async fn open(&self) -> Result<(), BrokerError> {
        probe(self.config.clone(), self.timeout).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.topics.lock().clear();
        if let Some(consumer) = self.consumer.lock().take() {
            consumer.unsubscribe();
        }
        Ok(())
    }
}

#[async_trait]
impl ConsumerLink for KafkaConsumerLink {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
        let subscribe_err = |e: KafkaError| BrokerError::Subscribe {
            topic: topic.to_string(),
            message: e.to_string(),
        };

        let mut topics = self.topics.lock();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }

        let consumer: StreamConsumer = self
            .config
            .clone()
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set(
                "auto.offset.reset",
                if from_beginning { "earliest" } else { "latest" },
            )
            .create()
            .map_err(subscribe_err)?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&names).map_err(subscribe_err)?;

        *self.consumer.lock() = Some(Arc::new(consumer));
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError> {
        let consumer = self
            .consumer
            .lock()
            .clone()
            .ok_or(BrokerError::NotConnected("consumer"))?;

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(backend_err(e)),
            Ok(Ok(m)) => Ok(Some(ReceivedMessage {
                topic: m.topic().to_string(),
                partition: m.partition().max(0) as u32,
                offset: m.offset().max(0) as u64,
                key: m.key().map(|k| String::from_utf8_lossy(k).into_owned()),
                value: m.payload().map(|v| String::from_utf8_lossy(v).into_owned()),
                timestamp: m.timestamp().to_millis().map(|t| t.to_string()),
            })),
        }
    }
}

struct KafkaAdminLink {
    config: ClientConfig,
    timeout: Duration,
    admin: Mutex<Option<Arc<AdminClient<DefaultClientContext>>>>,
}

#[async_trait]
impl Link for KafkaAdminLink {
    async fn open(&self) -> Result<(), BrokerError> {
        probe(self.config.clone(), self.timeout).await?;
        let admin: AdminClient<DefaultClientContext> =
            self.config.create().map_err(backend_err)?;
        *self.admin.lock() = Some(Arc::new(admin));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.admin.lock().take();
        Ok(())
    }
}

#[async_trait]
impl AdminLink for KafkaAdminLink {
    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<(), BrokerError> {
        let admin = self
            .admin
            .lock()
            .clone()
            .ok_or(BrokerError::NotConnected("admin"))?;

        let new_topic = NewTopic::new(
            topic,
            partitions as i32,
            TopicReplication::Fixed(i32::from(replication_factor)),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let results = admin
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| BrokerError::Admin(e.to_string()))?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicExists(name));
                }
                Err((name, code)) => {
                    return Err(BrokerError::Admin(format!("{name}: {code}")));
                }
            }
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        if self.admin.lock().is_none() {
            return Err(BrokerError::NotConnected("admin"));
        }
        probe(self.config.clone(), self.timeout).await
    }
}
