//! Shared test support utilities
//!
//! Scripted broker links and capturing sinks for unit and integration tests.

use crate::broker::{
    AdminLink, BrokerBackend, BrokerMessage, ConsumerLink, Link, MemoryBroker, ProducerLink,
};
use crate::config::BrokerClientConfig;
use crate::domain::{BrokerError, RenderedEntry};
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::time::Instant;

/// Producer link whose sends fail on a script: the first `n` sends, or all
/// of them. Counts every call.
pub struct ScriptedProducerLink {
    failures_left: Option<AtomicU32>,
    fail_open: AtomicBool,
    opens: AtomicU32,
    closes: AtomicU32,
    sends: AtomicU32,
    send_times: Mutex<Vec<Instant>>,
    sent: Mutex<Vec<(String, BrokerMessage)>>,
}

impl ScriptedProducerLink {
    fn with_failures(failures_left: Option<AtomicU32>) -> Self {
        Self {
            failures_left,
            fail_open: AtomicBool::new(false),
            opens: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            sends: AtomicU32::new(0),
            send_times: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::with_failures(None)
    }

    pub fn failing_first(n: u32) -> Self {
        Self::with_failures(Some(AtomicU32::new(n)))
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn send_times(&self) -> Vec<Instant> {
        self.send_times.lock().clone()
    }

    /// Messages accepted so far, with their topic.
    pub fn sent(&self) -> Vec<(String, BrokerMessage)> {
        self.sent.lock().clone()
    }

    fn should_fail(&self) -> bool {
        match &self.failures_left {
            None => true,
            Some(left) => left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

#[async_trait]
impl Link for ScriptedProducerLink {
    async fn open(&self) -> Result<(), BrokerError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("scripted open failure".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ProducerLink for ScriptedProducerLink {
    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.send_times.lock().push(Instant::now());
        if self.should_fail() {
            return Err(BrokerError::Send {
                topic: topic.to_string(),
                message: "scripted send failure".to_string(),
            });
        }
        self.sent
            .lock()
            .extend(messages.iter().map(|m| (topic.to_string(), m.clone())));
        Ok(())
    }
}

/// Backend handing out one shared scripted producer link. Consumers and
/// admins go to an in-memory broker.
#[derive(Clone)]
pub struct ScriptedBackend {
    pub producer: Arc<ScriptedProducerLink>,
    pub memory: MemoryBroker,
}

impl ScriptedBackend {
    pub fn new(producer: ScriptedProducerLink) -> Self {
        Self {
            producer: Arc::new(producer),
            memory: MemoryBroker::new(),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(ScriptedProducerLink::always_failing())
    }

    pub fn failing_first(n: u32) -> Self {
        Self::new(ScriptedProducerLink::failing_first(n))
    }
}

impl BrokerBackend for ScriptedBackend {
    fn producer_link(&self, _config: &BrokerClientConfig) -> Arc<dyn ProducerLink> {
        self.producer.clone()
    }

    fn consumer_link(&self, config: &BrokerClientConfig, group_id: &str) -> Arc<dyn ConsumerLink> {
        self.memory.consumer_link(config, group_id)
    }

    fn admin_link(&self, config: &BrokerClientConfig) -> Arc<dyn AdminLink> {
        self.memory.admin_link(config)
    }
}

/// In-memory `Write` target that can be read back while shared.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that keeps every entry it is given.
#[derive(Clone, Default)]
pub struct CapturingTransport {
    entries: Arc<Mutex<Vec<RenderedEntry>>>,
}

impl CapturingTransport {
    pub fn entries(&self) -> Vec<RenderedEntry> {
        self.entries.lock().clone()
    }
}

impl Transport for CapturingTransport {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn write(&self, entry: &RenderedEntry) {
        self.entries.lock().push(entry.clone());
    }
}
