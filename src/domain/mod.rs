//! Domain layer for shopra-logging.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEntry`: one record per log call, the wire format of every sink
//! - `LogLevel`: severity (Debug/Info/Warn/Error)
//! - `ErrorPayload`: normalized error attached to `error(...)` calls
//! - Error enums for configuration, broker and logger construction

pub mod error;
pub mod log_entry;
pub mod log_level;

pub use error::{BrokerError, ConfigError, LoggerError};
pub use log_entry::{ErrorPayload, LogEntry, Meta, RenderedEntry};
pub use log_level::LogLevel;
