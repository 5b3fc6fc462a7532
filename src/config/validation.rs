use super::LoggerConfig;
use crate::domain::ConfigError;

impl LoggerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Missing("service name".to_string()));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Broker queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.log_to_file {
            if self.file.retention_days == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "LOG_FILE_RETENTION_DAYS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            if self.file.max_size_bytes == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "LOG_FILE_MAX_SIZE".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        match (&self.broker, self.log_to_kafka) {
            (Some(broker), true) => {
                broker.client_config()?;
                if broker.topic.trim().is_empty() {
                    return Err(ConfigError::Missing("KAFKA_LOG_TOPIC".to_string()));
                }
            }
            (None, true) => {
                return Err(ConfigError::Invalid(
                    "Broker logging is enabled but no broker configuration was given".to_string(),
                ));
            }
            (Some(_), false) => {
                return Err(ConfigError::Invalid(
                    "Broker configuration given while broker logging is disabled".to_string(),
                ));
            }
            (None, false) => {}
        }

        Ok(())
    }
}
