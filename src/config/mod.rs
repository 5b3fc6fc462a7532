mod broker;
pub mod env;
mod validation;

pub use broker::BrokerClientConfig;

use crate::domain::{ConfigError, LogLevel};
use env::{
    load_env_flag_opt_in, load_env_flag_opt_out, load_env_path, load_env_string, load_env_var,
    parse_size,
};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SERVICE_NAME: &str = "logging-lib";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Tunables of the rotating file sink.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSinkConfig {
    pub directory: PathBuf,
    pub max_size_bytes: u64,
    pub retention_days: u32,
    pub compress: bool,
    pub sweep_interval: Duration,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            max_size_bytes: DEFAULT_MAX_FILE_SIZE,
            retention_days: 7,
            compress: false,
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Tunables of the broker log shipper.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSinkConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub client_id: String,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for BrokerSinkConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "logs".to_string(),
            client_id: DEFAULT_SERVICE_NAME.to_string(),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl BrokerSinkConfig {
    pub fn client_config(&self) -> Result<BrokerClientConfig, ConfigError> {
        BrokerClientConfig::new(&self.client_id, &self.brokers)
    }
}

/// Everything a `LoggerService` reads at construction.
///
/// `broker` is present iff `log_to_kafka` is set; `validate` enforces this.
/// Zero enabled sinks is a valid (silent) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    pub service_name: String,
    pub min_level: LogLevel,
    pub log_to_console: bool,
    pub log_to_file: bool,
    pub log_to_kafka: bool,
    pub file: FileSinkConfig,
    pub broker: Option<BrokerSinkConfig>,
    /// Capacity of the bounded queue in front of the broker sink.
    pub queue_capacity: usize,
    /// Attach a captured backtrace as `meta.stack` on `error(...)` calls.
    pub capture_backtraces: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            min_level: LogLevel::Info,
            log_to_console: false,
            log_to_file: true,
            log_to_kafka: false,
            file: FileSinkConfig::default(),
            broker: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            capture_backtraces: false,
        }
    }
}

impl LoggerConfig {
    /// A configuration with every sink disabled.
    pub fn silent(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_to_file: false,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = LoggerConfig::default();

        load_env_string("SERVICE_NAME", &mut config.service_name);
        load_env_var("LOG_LEVEL", &mut config.min_level)?;
        load_env_flag_opt_in("LOG_TO_CONSOLE", &mut config.log_to_console);
        load_env_flag_opt_out("LOG_TO_FILE", &mut config.log_to_file);
        load_env_flag_opt_in("LOG_TO_KAFKA", &mut config.log_to_kafka);

        load_env_path("LOG_DIR", &mut config.file.directory);
        if let Ok(raw) = std::env::var("LOG_FILE_MAX_SIZE") {
            config.file.max_size_bytes =
                parse_size(&raw).map_err(|message| ConfigError::InvalidValue {
                    key: "LOG_FILE_MAX_SIZE".to_string(),
                    message,
                })?;
        }
        load_env_var("LOG_FILE_RETENTION_DAYS", &mut config.file.retention_days)?;
        load_env_flag_opt_in("LOG_FILE_COMPRESSION", &mut config.file.compress);
        load_env_var("LOG_QUEUE_CAPACITY", &mut config.queue_capacity)?;
        load_env_flag_opt_in("LOG_CAPTURE_BACKTRACES", &mut config.capture_backtraces);

        if config.log_to_kafka {
            let mut broker = BrokerSinkConfig::default();
            let mut brokers_csv = broker.brokers.join(",");
            load_env_string("KAFKA_BROKERS", &mut brokers_csv);
            broker.brokers = brokers_csv
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
            load_env_string("KAFKA_LOG_TOPIC", &mut broker.topic);
            load_env_string("KAFKA_CLIENT_ID", &mut broker.client_id);
            load_env_var("KAFKA_RETRY_ATTEMPTS", &mut broker.retry_attempts)?;
            let mut delay_ms = broker.retry_delay.as_millis() as u64;
            load_env_var("KAFKA_RETRY_DELAY_MS", &mut delay_ms)?;
            broker.retry_delay = Duration::from_millis(delay_ms);
            config.broker = Some(broker);
        }

        config.validate()?;
        Ok(config)
    }

    /// Same configuration under another service name.
    pub fn for_service(&self, service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KEYS: [&str; 16] = [
        "SERVICE_NAME",
        "LOG_LEVEL",
        "LOG_TO_CONSOLE",
        "LOG_TO_FILE",
        "LOG_TO_KAFKA",
        "LOG_DIR",
        "LOG_FILE_MAX_SIZE",
        "LOG_FILE_RETENTION_DAYS",
        "LOG_FILE_COMPRESSION",
        "LOG_QUEUE_CAPACITY",
        "LOG_CAPTURE_BACKTRACES",
        "KAFKA_BROKERS",
        "KAFKA_LOG_TOPIC",
        "KAFKA_CLIENT_ID",
        "KAFKA_RETRY_ATTEMPTS",
        "KAFKA_RETRY_DELAY_MS",
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let kvs: Vec<(&str, Option<&str>)> = ALL_KEYS
            .iter()
            .map(|key| {
                let value = vars.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(kvs, f);
    }

    #[test]
    fn test_from_env_defaults() {
        with_env(&[], || {
            let config = LoggerConfig::from_env().unwrap();
            assert_eq!(config.service_name, "logging-lib");
            assert_eq!(config.min_level, LogLevel::Info);
            assert!(!config.log_to_console);
            assert!(config.log_to_file);
            assert!(!config.log_to_kafka);
            assert!(config.broker.is_none());
            assert_eq!(config.file.retention_days, 7);
            assert_eq!(config.file.max_size_bytes, DEFAULT_MAX_FILE_SIZE);
            assert!(!config.file.compress);
        });
    }

    #[test]
    fn test_from_env_with_kafka() {
        with_env(
            &[
                ("SERVICE_NAME", "orders"),
                ("LOG_LEVEL", "debug"),
                ("LOG_TO_CONSOLE", "true"),
                ("LOG_TO_FILE", "false"),
                ("LOG_TO_KAFKA", "true"),
                ("KAFKA_BROKERS", "k1:9092, k2:9092"),
                ("KAFKA_LOG_TOPIC", "service-logs"),
                ("KAFKA_RETRY_ATTEMPTS", "5"),
                ("KAFKA_RETRY_DELAY_MS", "250"),
                ("LOG_FILE_MAX_SIZE", "1m"),
            ],
            || {
                let config = LoggerConfig::from_env().unwrap();
                assert_eq!(config.service_name, "orders");
                assert_eq!(config.min_level, LogLevel::Debug);
                assert!(config.log_to_console);
                assert!(!config.log_to_file);
                let broker = config.broker.unwrap();
                assert_eq!(broker.brokers, ["k1:9092", "k2:9092"]);
                assert_eq!(broker.topic, "service-logs");
                assert_eq!(broker.client_id, "logging-lib");
                assert_eq!(broker.retry_attempts, 5);
                assert_eq!(broker.retry_delay, Duration::from_millis(250));
                assert_eq!(config.file.max_size_bytes, 1024 * 1024);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_empty_brokers_when_kafka_enabled() {
        with_env(&[("LOG_TO_KAFKA", "true"), ("KAFKA_BROKERS", "")], || {
            assert_eq!(
                LoggerConfig::from_env().unwrap_err(),
                ConfigError::EmptyBrokers
            );
        });
    }

    #[test]
    fn test_from_env_rejects_zero_retention() {
        with_env(&[("LOG_FILE_RETENTION_DAYS", "0")], || {
            assert!(LoggerConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_from_env_rejects_bad_level() {
        with_env(&[("LOG_LEVEL", "verbose")], || {
            assert!(matches!(
                LoggerConfig::from_env(),
                Err(ConfigError::InvalidValue { .. })
            ));
        });
    }

    #[test]
    fn test_for_service_keeps_sinks() {
        let config = LoggerConfig::silent("api").for_service("api:users");
        assert_eq!(config.service_name, "api:users");
        assert!(!config.log_to_file);
    }
}
