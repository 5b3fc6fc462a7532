use super::log_level::LogLevel;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open key-value bag attached to an entry.
pub type Meta = serde_json::Map<String, Value>;

/// One record per log call.
///
/// This is the wire format of every sink: the file sink writes it as one
/// JSON line and the broker sink ships the same JSON as the message value.
/// Entries are never mutated after construction; enrichment produces a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "iso8601_millis")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub service: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(
        default,
        rename = "requestId",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            service: service.into(),
            message: message.into(),
            meta: None,
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Option<Meta>) -> Self {
        self.meta = meta;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Returns a copy whose `meta.stack` carries the given stack trace.
    pub fn with_stack(&self, stack: impl Into<String>) -> Self {
        let mut enriched = self.clone();
        enriched
            .meta
            .get_or_insert_with(Meta::new)
            .insert("stack".to_string(), Value::String(stack.into()));
        enriched
    }

    /// Broker message timestamp: epoch milliseconds as a decimal string.
    pub fn epoch_millis(&self) -> String {
        self.timestamp.timestamp_millis().to_string()
    }

    pub fn to_json(&self) -> String {
        // A map of JSON values with string keys always serializes.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"level":"{}","service":{:?},"message":"unserializable entry: {}"}}"#,
                self.level, self.service, e
            )
        })
    }
}

/// An entry together with its JSON rendering, produced once per log call and
/// shared by every sink.
#[derive(Debug, Clone)]
pub struct RenderedEntry {
    pub entry: LogEntry,
    pub json: String,
}

impl RenderedEntry {
    pub fn new(entry: LogEntry) -> Self {
        let json = entry.to_json();
        Self { entry, json }
    }
}

/// Error attached to an `error(...)` call, normalized before dispatch.
///
/// A real error becomes `{name, message, stack}`; a plain string stays a
/// string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Structured {
        name: String,
        message: String,
        stack: String,
    },
    Text(String),
}

impl ErrorPayload {
    /// Normalize any error value. `stack` renders the error followed by its
    /// `source()` chain, one cause per line.
    ///
    /// `name` is the static type of `err`: pass the concrete error, not a
    /// `&dyn Error`, or the name is just `Error`.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let name = short_type_name(std::any::type_name::<E>());
        let message = err.to_string();

        let mut stack = format!("{name}: {message}");
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str("\n    caused by: ");
            stack.push_str(&cause.to_string());
            source = cause.source();
        }

        ErrorPayload::Structured {
            name,
            message,
            stack,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<&str> for ErrorPayload {
    fn from(s: &str) -> Self {
        ErrorPayload::Text(s.to_string())
    }
}

impl From<String> for ErrorPayload {
    fn from(s: String) -> Self {
        ErrorPayload::Text(s)
    }
}

/// The concrete type is erased here, so `name` is always `Error`. Prefer
/// `ErrorPayload::from_error(&concrete)` when the type is known.
impl From<&(dyn std::error::Error + 'static)> for ErrorPayload {
    fn from(err: &(dyn std::error::Error + 'static)) -> Self {
        ErrorPayload::from_error(err)
    }
}

/// `std::io::error::Error` -> `Error`, `my_crate::Wrapper<u8>` -> `Wrapper`.
fn short_type_name(full: &str) -> String {
    let without_generics = full.split('<').next().unwrap_or(full);
    let short = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .trim_start_matches("dyn ");
    if short.is_empty() {
        "Error".to_string()
    } else {
        short.to_string()
    }
}

/// Normalize caller-supplied meta. Objects pass through verbatim, `null`
/// means no meta, any other value is wrapped as `{"value": ...}`.
pub(crate) fn normalize_meta(meta: Option<Value>) -> Option<Meta> {
    match meta? {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            let mut map = Meta::new();
            map.insert("value".to_string(), other);
            Some(map)
        }
    }
}

mod iso8601_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
