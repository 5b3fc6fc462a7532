use super::{
    BrokerBackend, Connection, ConnectionState, ConsumerLink, DEFAULT_BASE_DELAY, ReceivedMessage,
};
use crate::config::BrokerClientConfig;
use crate::domain::BrokerError;
use crate::shutdown::ShutdownCoordinator;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub topic: String,
    pub group_id: String,
    pub from_beginning: bool,
}

impl ConsumerOptions {
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            from_beginning: false,
        }
    }

    #[must_use]
    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }
}

struct RunLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Group member reading one or more topics.
///
/// `run` detaches a poll loop that feeds the handler one message at a time;
/// a failing or panicking handler is logged and the loop moves on.
#[derive(Clone)]
pub struct Consumer {
    conn: Arc<Connection<dyn ConsumerLink>>,
    link: Arc<dyn ConsumerLink>,
    options: ConsumerOptions,
    run_loop: Arc<Mutex<Option<RunLoop>>>,
}

impl Consumer {
    pub fn new(
        backend: &dyn BrokerBackend,
        config: &BrokerClientConfig,
        options: ConsumerOptions,
    ) -> Self {
        Self::with_backoff(backend, config, options, DEFAULT_BASE_DELAY)
    }

    pub fn with_backoff(
        backend: &dyn BrokerBackend,
        config: &BrokerClientConfig,
        options: ConsumerOptions,
        base_delay: Duration,
    ) -> Self {
        let link = backend.consumer_link(config, &options.group_id);
        let conn = Connection::new("consumer", link.clone()).with_base_delay(base_delay);
        Self {
            conn: Arc::new(conn),
            link,
            options,
            run_loop: Arc::new(Mutex::new(None)),
        }
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub async fn connect(&self, max_retries: u32) -> Result<(), BrokerError> {
        self.conn.connect(max_retries).await
    }

    /// Stop the run loop, then close the connection.
    pub async fn disconnect(&self) -> Result<bool, BrokerError> {
        self.stop().await;
        self.conn.disconnect().await
    }

    /// Subscribe to the topic named in the consumer's options.
    pub async fn subscribe_default(&self) -> Result<(), BrokerError> {
        let topic = self.options.topic.clone();
        self.subscribe(&topic, self.options.from_beginning).await
    }

    pub async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
        if !self.conn.is_connected() {
            return Err(BrokerError::NotConnected("consumer"));
        }

        match self.link.subscribe(topic, from_beginning).await {
            Ok(()) => {
                info!(
                    topic,
                    group_id = %self.options.group_id,
                    from_beginning,
                    "[consumer] Subscribed to topic"
                );
                Ok(())
            }
            Err(e) => {
                error!(topic, "[consumer] Failed to subscribe: {e}");
                Err(e)
            }
        }
    }

    /// Start delivering messages to `handler` on a detached task.
    ///
    /// Returns once the loop is running. Handler errors and panics are
    /// logged and do not stop the loop.
    pub fn run<F, Fut, E>(&self, handler: F) -> Result<(), BrokerError>
    where
        F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if !self.conn.is_connected() {
            return Err(BrokerError::NotConnected("consumer"));
        }

        let mut run_loop = self.run_loop.lock();
        if run_loop.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(BrokerError::AlreadyRunning);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BrokerError::Backend(format!("consumer run requires a runtime: {e}")))?;

        let token = CancellationToken::new();
        let handle = runtime.spawn(poll_loop(self.link.clone(), handler, token.clone()));
        *run_loop = Some(RunLoop { token, handle });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.run_loop
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Cancel the run loop and wait for it to exit. The message being
    /// handled, if any, finishes first.
    pub async fn stop(&self) {
        let run_loop = self.run_loop.lock().take();
        if let Some(RunLoop { token, handle }) = run_loop {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("[consumer] Run loop ended abnormally: {e}");
            }
        }
    }

    pub fn register_shutdown(&self, coordinator: &ShutdownCoordinator) -> bool {
        let consumer = self.clone();
        coordinator.register(format!("consumer:{}", self.conn.id()), move || async move {
            if let Err(e) = consumer.disconnect().await {
                error!("[consumer] Disconnect during shutdown failed: {e}");
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

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("conn", &self.conn)
            .field("options", &self.options)
            .finish()
    }
}

async fn poll_loop<F, Fut, E>(link: Arc<dyn ConsumerLink>, handler: F, token: CancellationToken)
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    info!("[consumer] Run loop started");
    loop {
        let polled = tokio::select! {
            _ = token.cancelled() => break,
            polled = link.poll(POLL_INTERVAL) => polled,
        };

        match polled {
            Ok(Some(message)) => {
                let topic = message.topic.clone();
                let partition = message.partition;
                let offset = message.offset;
                let outcome = AssertUnwindSafe(async { handler(message).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => debug!(topic, partition, offset, "[consumer] Message consumed"),
                    Ok(Err(e)) => error!(topic, partition, offset, "[consumer] Handler error: {e}"),
                    Err(_) => error!(topic, partition, offset, "[consumer] Handler panicked"),
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("[consumer] Poll failed: {e}");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }
    }
    info!("[consumer] Run loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerMessage, MemoryBroker, Producer};
    use tokio::sync::mpsc;

    fn config() -> BrokerClientConfig {
        BrokerClientConfig::parse("test", "localhost:9092").unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let broker = MemoryBroker::new();
        let consumer = Consumer::new(&broker, &config(), ConsumerOptions::new("t", "g"));
        assert!(matches!(
            consumer.subscribe("t", false).await,
            Err(BrokerError::NotConnected("consumer"))
        ));
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_loop() {
        let broker = MemoryBroker::new();
        let consumer = Consumer::new(&broker, &config(), ConsumerOptions::new("jobs", "workers"));
        consumer.connect(1).await.unwrap();
        consumer.subscribe("jobs", true).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        consumer
            .run(move |message: ReceivedMessage| {
                let tx = tx.clone();
                async move {
                    let value = message.value.unwrap_or_default();
                    let _ = tx.send(value.clone());
                    if value == "bad" {
                        Err(format!("cannot process {value}"))
                    } else {
                        Ok(())
                    }
                }
            })
            .unwrap();

        let producer = Producer::new(&broker, &config());
        producer.connect(1).await.unwrap();
        for value in ["bad", "good"] {
            producer.send("jobs", &[BrokerMessage::new(value)]).await.unwrap();
        }

        assert_eq!(rx.recv().await.as_deref(), Some("bad"));
        assert_eq!(rx.recv().await.as_deref(), Some("good"));
        assert!(consumer.is_running());

        consumer.disconnect().await.unwrap();
        assert!(!consumer.is_running());
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_loop() {
        let broker = MemoryBroker::new();
        let consumer = Consumer::new(&broker, &config(), ConsumerOptions::new("jobs", "workers"));
        consumer.connect(1).await.unwrap();
        consumer.subscribe("jobs", true).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        consumer
            .run(move |message: ReceivedMessage| {
                let tx = tx.clone();
                async move {
                    if message.value.as_deref() == Some("panic") {
                        panic!("handler blew up");
                    }
                    let _ = tx.send(message.offset);
                    Ok::<(), String>(())
                }
            })
            .unwrap();

        let producer = Producer::new(&broker, &config());
        producer.connect(1).await.unwrap();
        producer
            .send("jobs", &[BrokerMessage::new("panic"), BrokerMessage::new("fine")])
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
        consumer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let broker = MemoryBroker::new();
        let consumer = Consumer::new(&broker, &config(), ConsumerOptions::new("t", "g"));
        consumer.connect(1).await.unwrap();
        consumer.subscribe_default().await.unwrap();

        consumer.run(|_| async { Ok::<(), String>(()) }).unwrap();
        assert!(matches!(
            consumer.run(|_| async { Ok::<(), String>(()) }),
            Err(BrokerError::AlreadyRunning)
        ));
        consumer.disconnect().await.unwrap();
    }
}
