//! Log sinks.
//!
//! Console and file sinks are synchronous and write inline on the caller's
//! thread. The broker sink is async and is driven by the logger's dispatch
//! worker instead.

pub mod audit;
pub mod broker;
pub mod console;
pub mod file;
pub mod retention;

pub use broker::{BrokerTransport, Delivery};
pub use console::ConsoleTransport;
pub use file::FileTransport;
pub use retention::{RetentionSweeper, SweepReport};

use crate::domain::RenderedEntry;

/// Target of the crate's own fallback diagnostics: dropped broker entries,
/// full broker queues and file I/O failures.
///
/// These are plain `tracing` events. Without a subscriber installed they go
/// nowhere, so a service that wants them on stderr must install one (the
/// relay does, see `app::tracing::init_tracing`) and keep this target
/// enabled.
pub const FALLBACK_TARGET: &str = "shopra_logging::fallback";

/// A synchronous sink. Implementations absorb their own failures.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn write(&self, entry: &RenderedEntry);
}
