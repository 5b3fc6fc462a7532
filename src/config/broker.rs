use crate::domain::ConfigError;
use serde::{Deserialize, Serialize};

/// Connection settings shared by producer, consumer and admin clients.
///
/// Constructing one validates the broker list, so an empty or malformed list
/// fails before any network attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerClientConfig {
    client_id: String,
    brokers: Vec<String>,
}

impl BrokerClientConfig {
    pub fn new<I, S>(client_id: impl Into<String>, brokers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client id".to_string()));
        }

        let brokers: Vec<String> = brokers
            .into_iter()
            .map(|b| b.as_ref().trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(ConfigError::EmptyBrokers);
        }
        for broker in &brokers {
            validate_broker_address(broker)?;
        }

        Ok(Self { client_id, brokers })
    }

    /// Parse a comma-separated broker list such as `kafka-1:9092,kafka-2:9092`.
    pub fn parse(client_id: impl Into<String>, brokers_csv: &str) -> Result<Self, ConfigError> {
        Self::new(client_id, brokers_csv.split(','))
    }

    /// Reads `KAFKA_BROKERS` and `KAFKA_CLIENT_ID`; both are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_default();
        if brokers.trim().is_empty() {
            return Err(ConfigError::Missing(
                "KAFKA_BROKERS (comma-separated list of brokers)".to_string(),
            ));
        }
        let client_id = std::env::var("KAFKA_CLIENT_ID").unwrap_or_default();
        if client_id.trim().is_empty() {
            return Err(ConfigError::Missing("KAFKA_CLIENT_ID".to_string()));
        }
        Self::parse(client_id.trim(), &brokers)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }
}

fn validate_broker_address(address: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidBrokerAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(_) => Ok(()),
    }
}
