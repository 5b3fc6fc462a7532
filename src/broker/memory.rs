//! In-process broker.
//!
//! Topics are split into partitions; keyed messages always land on the same
//! partition, unkeyed ones are spread round robin. Consumer groups track a
//! committed offset per partition, so a restarted group member resumes where
//! the group left off. `set_reachable(false)` makes every link call fail,
//! which is how tests simulate an outage.

use super::{
    AdminLink, BrokerBackend, BrokerMessage, ConsumerLink, Link, ProducerLink, ReceivedMessage,
};
use crate::config::BrokerClientConfig;
use crate::domain::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<String>,
    value: String,
    timestamp: Option<String>,
}

#[derive(Debug, Default)]
struct Topic {
    partitions: Vec<Vec<StoredMessage>>,
    next_partition: usize,
}

impl Topic {
    fn with_partitions(count: u32) -> Self {
        Self {
            partitions: vec![Vec::new(); count.max(1) as usize],
            next_partition: 0,
        }
    }

    fn partition_for(&mut self, key: Option<&str>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            None => {
                let partition = self.next_partition % count;
                self.next_partition = (partition + 1) % count;
                partition
            }
        }
    }

    fn ends(&self) -> Vec<u64> {
        self.partitions.iter().map(|p| p.len() as u64).collect()
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: BTreeMap<String, Topic>,
    /// (group, topic, partition) -> next offset to read.
    committed: HashMap<(String, String, u32), u64>,
}

impl ClusterState {
    fn topic_mut(&mut self, name: &str, default_partitions: u32) -> &mut Topic {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Topic::with_partitions(default_partitions))
    }
}

struct Shared {
    state: Mutex<ClusterState>,
    changes: watch::Sender<u64>,
    reachable: AtomicBool,
    default_partitions: u32,
}

#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("topics", &self.topic_names())
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

impl MemoryBroker {
    /// A broker whose auto-created topics have a single partition.
    pub fn new() -> Self {
        Self::with_default_partitions(1)
    }

    pub fn with_default_partitions(partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ClusterState::default()),
                changes: watch::Sender::new(0),
                reachable: AtomicBool::new(true),
                default_partitions: partitions.max(1),
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
        self.notify();
    }

    pub fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::SeqCst)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.shared.state.lock().topics.keys().cloned().collect()
    }

    /// Every message stored in `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<ReceivedMessage> {
        let state = self.shared.state.lock();
        let Some(t) = state.topics.get(topic) else {
            return Vec::new();
        };
        t.partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, messages)| {
                messages
                    .iter()
                    .enumerate()
                    .map(move |(offset, m)| received(topic, partition as u32, offset as u64, m))
            })
            .collect()
    }

    fn ensure_reachable(&self) -> Result<(), BrokerError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(BrokerError::Unreachable("memory broker is offline".to_string()))
        }
    }

    fn notify(&self) {
        self.shared.changes.send_modify(|version| *version += 1);
    }

    fn append(&self, topic: &str, messages: &[BrokerMessage]) {
        {
            let mut state = self.shared.state.lock();
            let t = state.topic_mut(topic, self.shared.default_partitions);
            for message in messages {
                let partition = t.partition_for(message.key.as_deref());
                t.partitions[partition].push(StoredMessage {
                    key: message.key.clone(),
                    value: message.value.clone(),
                    timestamp: message.timestamp.clone(),
                });
            }
        }
        self.notify();
    }
}

fn received(topic: &str, partition: u32, offset: u64, m: &StoredMessage) -> ReceivedMessage {
    ReceivedMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: m.key.clone(),
        value: Some(m.value.clone()),
        timestamp: m.timestamp.clone(),
    }
}

impl BrokerBackend for MemoryBroker {
    fn producer_link(&self, _config: &BrokerClientConfig) -> Arc<dyn ProducerLink> {
        Arc::new(MemoryProducerLink {
            broker: self.clone(),
        })
    }

    fn consumer_link(&self, _config: &BrokerClientConfig, group_id: &str) -> Arc<dyn ConsumerLink> {
        Arc::new(MemoryConsumerLink {
            broker: self.clone(),
            group_id: group_id.to_string(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    fn admin_link(&self, _config: &BrokerClientConfig) -> Arc<dyn AdminLink> {
        Arc::new(MemoryAdminLink {
            broker: self.clone(),
        })
    }
}

struct MemoryProducerLink {
    broker: MemoryBroker,
}

#[async_trait]
impl Link for MemoryProducerLink {
    async fn open(&self) -> Result<(), BrokerError> {
        self.broker.ensure_reachable()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[async_trait]
impl ProducerLink for MemoryProducerLink {
    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        self.broker
            .ensure_reachable()
            .map_err(|e| BrokerError::Send {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;
        self.broker.append(topic, messages);
        Ok(())
    }
}

struct Subscription {
    topic: String,
    /// Next offset to read, per partition.
    positions: Vec<u64>,
}

struct MemoryConsumerLink {
    broker: MemoryBroker,
    group_id: String,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MemoryConsumerLink {
    fn next_message(&self) -> Option<ReceivedMessage> {
        let mut subscriptions = self.subscriptions.lock();
        let mut state = self.broker.shared.state.lock();
        let ClusterState { topics, committed } = &mut *state;

        for sub in subscriptions.iter_mut() {
            let Some(topic) = topics.get(&sub.topic) else {
                continue;
            };
            for (partition, messages) in topic.partitions.iter().enumerate() {
                let Some(position) = sub.positions.get_mut(partition) else {
                    continue;
                };
                if let Some(stored) = messages.get(*position as usize) {
                    let message = received(&sub.topic, partition as u32, *position, stored);
                    *position += 1;
                    committed.insert(
                        (self.group_id.clone(), sub.topic.clone(), partition as u32),
                        *position,
                    );
                    return Some(message);
                }
            }
        }
        None
    }
}

#[async_trait]
impl Link for MemoryConsumerLink {
    async fn open(&self) -> Result<(), BrokerError> {
        self.broker.ensure_reachable()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.subscriptions.lock().clear();
        Ok(())
    }
}

#[async_trait]
impl ConsumerLink for MemoryConsumerLink {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
        self.broker
            .ensure_reachable()
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        let positions = {
            let mut state = self.broker.shared.state.lock();
            let ends = state
                .topic_mut(topic, self.broker.shared.default_partitions)
                .ends();
            ends.iter()
                .enumerate()
                .map(|(partition, end)| {
                    let key = (self.group_id.clone(), topic.to_string(), partition as u32);
                    match state.committed.get(&key) {
                        Some(offset) => *offset,
                        None if from_beginning => 0,
                        None => *end,
                    }
                })
                .collect()
        };

        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|s| s.topic != topic);
        subscriptions.push(Subscription {
            topic: topic.to_string(),
            positions,
        });
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Subscribe before checking so an append in between still wakes us.
            let mut changes = self.broker.shared.changes.subscribe();
            self.broker.ensure_reachable()?;
            if let Some(message) = self.next_message() {
                return Ok(Some(message));
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }
}

struct MemoryAdminLink {
    broker: MemoryBroker,
}

#[async_trait]
impl Link for MemoryAdminLink {
    async fn open(&self) -> Result<(), BrokerError> {
        self.broker.ensure_reachable()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[async_trait]
impl AdminLink for MemoryAdminLink {
    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        _replication_factor: u16,
    ) -> Result<(), BrokerError> {
        self.broker.ensure_reachable()?;
        {
            let mut state = self.broker.shared.state.lock();
            if state.topics.contains_key(topic) {
                return Err(BrokerError::TopicExists(topic.to_string()));
            }
            state
                .topics
                .insert(topic.to_string(), Topic::with_partitions(partitions));
        }
        self.broker.notify();
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        self.broker.ensure_reachable()?;
        Ok(self.broker.topic_names())
    }
}
