use thiserror::Error;

/// Invalid or missing settings. Always fatal at construction, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Broker list is empty")]
    EmptyBrokers,

    #[error("Invalid broker address '{0}' (expected host:port)")]
    InvalidBrokerAddress(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("{role} failed to connect after {attempts} attempt(s): {source}")]
    ConnectFailed {
        role: &'static str,
        attempts: u32,
        #[source]
        source: Box<BrokerError>,
    },

    #[error("{0} is not connected")]
    NotConnected(&'static str),

    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Send to topic '{topic}' failed: {message}")]
    Send { topic: String, message: String },

    #[error("Subscribe to topic '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Topic already exists: {0}")]
    TopicExists(String),

    #[error("Admin operation failed: {0}")]
    Admin(String),

    #[error("Consumer is already running")]
    AlreadyRunning,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Broker sink requires a running tokio runtime")]
    NoRuntime,

    #[error("Failed to prepare log directory {path}: {source}")]
    LogDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
