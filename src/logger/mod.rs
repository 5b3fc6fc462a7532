//! The service-facing logger.
//!
//! A `LoggerService` is an immutable value (service name, optional request
//! id) over a shared sink set. Every log call renders the entry once and
//! hands it to console, file, extra sinks and finally the broker queue, in
//! that order. Nothing on this path returns an error or blocks on the
//! network.

mod dispatch;

use crate::broker::{BrokerBackend, default_backend};
use crate::config::LoggerConfig;
use crate::domain::log_entry::normalize_meta;
use crate::domain::{
    ConfigError, ErrorPayload, LogEntry, LogLevel, LoggerError, Meta, RenderedEntry,
};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{BrokerTransport, ConsoleTransport, FileTransport, Transport};
use dispatch::BrokerDispatcher;
use parking_lot::Mutex;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct SinkSet {
    id: String,
    min_level: LogLevel,
    capture_backtraces: bool,
    console: Option<ConsoleTransport>,
    file: Option<FileTransport>,
    extra: Vec<Box<dyn Transport>>,
    broker: Option<BrokerDispatcher>,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    closed: AtomicBool,
}

impl SinkSet {
    fn write(&self, entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        let rendered = Arc::new(RenderedEntry::new(entry));

        if let Some(console) = &self.console {
            console.write(&rendered);
        }
        if let Some(file) = &self.file {
            file.write(&rendered);
        }
        for sink in &self.extra {
            sink.write(&rendered);
        }
        if let Some(broker) = &self.broker {
            if !self.closed.load(Ordering::SeqCst) {
                broker.dispatch(rendered);
            }
        }
    }

    async fn flush(&self) {
        if let Some(broker) = &self.broker {
            broker.flush().await;
        }
    }

    /// Idempotent: only the first call does anything.
    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let sweeper = self.sweeper.lock().take();
        if let Some((token, handle)) = sweeper {
            token.cancel();
            let _ = handle.await;
        }
        if let Some(broker) = &self.broker {
            broker.shutdown().await;
        }
        info!(logger = %self.id, "Logger shut down");
    }
}

impl Drop for SinkSet {
    fn drop(&mut self) {
        if let Some((token, _)) = self.sweeper.get_mut().as_ref() {
            token.cancel();
        }
        if let Some(broker) = &self.broker {
            broker.cancel();
        }
    }
}

/// Builder for a `LoggerService` with a non-default backend or extra sinks.
pub struct LoggerBuilder {
    config: LoggerConfig,
    backend: Option<Arc<dyn BrokerBackend>>,
    console_writer: Option<(Box<dyn Write + Send>, bool)>,
    transports: Vec<Box<dyn Transport>>,
}

impl LoggerBuilder {
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn BrokerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Send console output to `writer` instead of stdout.
    #[must_use]
    pub fn console_writer(mut self, writer: Box<dyn Write + Send>, colors: bool) -> Self {
        self.console_writer = Some((writer, colors));
        self
    }

    /// Add a sink written after the file sink and before the broker.
    #[must_use]
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn build(self) -> Result<LoggerService, LoggerError> {
        let config = self.config;
        config.validate()?;
        let runtime = Handle::try_current().ok();

        let console = config.log_to_console.then(|| match self.console_writer {
            Some((writer, colors)) => ConsoleTransport::with_writer(writer, colors),
            None => ConsoleTransport::stdout(),
        });

        let mut sweeper = None;
        let file = if config.log_to_file {
            let file = FileTransport::new(config.file.clone())?;
            if runtime.is_some() {
                let token = CancellationToken::new();
                let handle = file.retention_sweeper().spawn(token.clone());
                sweeper = Some((token, handle));
            } else {
                debug!("No tokio runtime, log retention sweeping disabled");
            }
            Some(file)
        } else {
            None
        };

        let broker = match (&config.broker, config.log_to_kafka) {
            (Some(broker_config), true) => {
                let runtime = runtime.as_ref().ok_or(LoggerError::NoRuntime)?;
                let backend = self.backend.or_else(default_backend).ok_or_else(|| {
                    ConfigError::Invalid(
                        "LOG_TO_KAFKA is set but no broker backend is available \
                         (build with the `kafka` feature or pass one to the builder)"
                            .to_string(),
                    )
                })?;
                let transport = BrokerTransport::new(backend.as_ref(), broker_config)?;
                Some(BrokerDispatcher::spawn(
                    runtime,
                    transport,
                    config.queue_capacity,
                ))
            }
            _ => None,
        };

        let sinks = SinkSet {
            id: uuid::Uuid::new_v4().to_string(),
            min_level: config.min_level,
            capture_backtraces: config.capture_backtraces,
            console,
            file,
            extra: self.transports,
            broker,
            sweeper: Mutex::new(sweeper),
            closed: AtomicBool::new(false),
        };

        debug!(
            service = %config.service_name,
            console = sinks.console.is_some(),
            file = sinks.file.is_some(),
            broker = sinks.broker.is_some(),
            "Logger built"
        );

        Ok(LoggerService {
            service_name: Arc::from(config.service_name.as_str()),
            request_id: None,
            sinks: Arc::new(sinks),
            owner: true,
        })
    }
}

/// Fan-out logger. See the module docs.
///
/// Values derived through `with_context`/`with_request_id` share the sinks of
/// the logger they came from but never own them: shutting one down leaves
/// the parent's connections open.
pub struct LoggerService {
    service_name: Arc<str>,
    request_id: Option<Arc<str>>,
    sinks: Arc<SinkSet>,
    owner: bool,
}

impl LoggerService {
    pub fn builder(config: LoggerConfig) -> LoggerBuilder {
        LoggerBuilder {
            config,
            backend: None,
            console_writer: None,
            transports: Vec::new(),
        }
    }

    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        Self::builder(config).build()
    }

    pub fn from_env() -> Result<Self, LoggerError> {
        Self::new(LoggerConfig::from_env()?)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn min_level(&self) -> LogLevel {
        self.sinks.min_level
    }

    /// A logger for a sub-component, named `<service>:<name>`.
    pub fn with_context(&self, name: &str) -> Self {
        Self {
            service_name: Arc::from(format!("{}:{name}", self.service_name)),
            request_id: self.request_id.clone(),
            sinks: self.sinks.clone(),
            owner: false,
        }
    }

    /// A logger stamping `requestId` on every entry.
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            service_name: self.service_name.clone(),
            request_id: Some(Arc::from(request_id.into())),
            sinks: self.sinks.clone(),
            owner: false,
        }
    }

    pub fn debug(&self, message: impl Into<String>, meta: Option<Value>) {
        self.log(LogLevel::Debug, message, meta);
    }

    pub fn info(&self, message: impl Into<String>, meta: Option<Value>) {
        self.log(LogLevel::Info, message, meta);
    }

    pub fn warn(&self, message: impl Into<String>, meta: Option<Value>) {
        self.log(LogLevel::Warn, message, meta);
    }

    /// Log an error. The error, if any, is stored as `meta.error`.
    pub fn error(
        &self,
        message: impl Into<String>,
        error: Option<ErrorPayload>,
        meta: Option<Value>,
    ) {
        if LogLevel::Error < self.sinks.min_level {
            return;
        }

        let mut meta = normalize_meta(meta);
        if let Some(error) = error {
            meta.get_or_insert_with(Meta::new)
                .insert("error".to_string(), error.to_value());
        }

        let entry = self.entry(LogLevel::Error, message.into(), meta);
        let entry = if self.sinks.capture_backtraces {
            entry.with_stack(Backtrace::force_capture().to_string())
        } else {
            entry
        };
        self.sinks.write(entry);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, meta: Option<Value>) {
        if level < self.sinks.min_level {
            return;
        }
        let entry = self.entry(level, message.into(), normalize_meta(meta));
        self.sinks.write(entry);
    }

    fn entry(&self, level: LogLevel, message: String, meta: Option<Meta>) -> LogEntry {
        LogEntry::new(level, self.service_name.as_ref(), message)
            .with_meta(meta)
            .with_request_id(self.request_id.as_deref().map(str::to_string))
    }

    /// Entries the broker sink has given up on so far.
    pub fn broker_dropped(&self) -> u64 {
        self.sinks.broker.as_ref().map_or(0, |b| b.dropped())
    }

    /// Whether the broker sink's producer is currently connected.
    pub fn broker_connected(&self) -> bool {
        self.sinks
            .broker
            .as_ref()
            .is_some_and(|b| b.transport().producer().is_connected())
    }

    /// Wait until the broker queue is drained. Returns at once without a
    /// broker sink.
    pub async fn flush(&self) {
        self.sinks.flush().await;
    }

    /// Tear down the sinks this logger owns. Derived loggers own nothing, so
    /// for them this is a no-op.
    pub async fn shutdown(&self) {
        if self.owner {
            self.sinks.shutdown().await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sinks.closed.load(Ordering::SeqCst)
    }

    /// Register this logger's teardown. Only owning loggers register; a
    /// second registration of the same sinks is a no-op.
    pub fn register_shutdown(&self, coordinator: &ShutdownCoordinator) -> bool {
        if !self.owner {
            return false;
        }
        let sinks = self.sinks.clone();
        coordinator.register(format!("logger:{}", self.sinks.id), move || async move {
            sinks.shutdown().await;
        })
    }
}

impl std::fmt::Debug for LoggerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerService")
            .field("service_name", &self.service_name)
            .field("request_id", &self.request_id)
            .field("owner", &self.owner)
            .finish()
    }
}
