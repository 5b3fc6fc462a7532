#![warn(rust_2018_idioms)]

pub mod app;
pub mod broker;
pub mod config;
pub mod domain;
pub mod logger;
pub mod shutdown;
pub mod transport;

#[doc(hidden)]
pub mod test_support;

pub use broker::{
    Admin, BrokerBackend, BrokerMessage, Consumer, ConsumerOptions, MemoryBroker, Producer,
    ReceivedMessage,
};
pub use config::{BrokerClientConfig, BrokerSinkConfig, FileSinkConfig, LoggerConfig};
pub use domain::{BrokerError, ConfigError, ErrorPayload, LogEntry, LogLevel, LoggerError};
pub use logger::{LoggerBuilder, LoggerService};
pub use shutdown::ShutdownCoordinator;
