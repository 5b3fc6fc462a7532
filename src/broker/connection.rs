use super::Link;
use crate::domain::BrokerError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONNECT_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Connect/disconnect state machine shared by producer, consumer and admin.
///
/// `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`.
/// Transitions are serialized by an async lifecycle lock, so concurrent
/// `connect` calls collapse into one and repeated `disconnect` calls are
/// no-ops.
pub struct Connection<L: ?Sized> {
    role: &'static str,
    id: String,
    link: Arc<L>,
    state: Mutex<ConnectionState>,
    lifecycle: tokio::sync::Mutex<()>,
    base_delay: Duration,
}

impl<L: Link + ?Sized> Connection<L> {
    pub fn new(role: &'static str, link: Arc<L>) -> Self {
        Self {
            role,
            id: uuid::Uuid::new_v4().to_string(),
            link,
            state: Mutex::new(ConnectionState::Disconnected),
            lifecycle: tokio::sync::Mutex::new(()),
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    /// Backoff unit: the wait after attempt `n` is `base_delay * n`.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Open the link, retrying with linearly increasing backoff. A no-op when
    /// already connected. `max_retries` is the total attempt budget; zero is
    /// treated as one attempt.
    pub async fn connect(&self, max_retries: u32) -> Result<(), BrokerError> {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let max_attempts = max_retries.max(1);
        self.set_state(ConnectionState::Connecting);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.link.open().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    info!(role = self.role, id = %self.id, attempt, "[{}] Connected", self.role);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        role = self.role,
                        attempt,
                        max_attempts,
                        "[{}] Failed to connect: {e}",
                        self.role
                    );
                    if attempt >= max_attempts {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(BrokerError::ConnectFailed {
                            role: self.role,
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    tokio::time::sleep(self.base_delay * attempt).await;
                }
            }
        }
    }

    /// Close the link. Returns `Ok(false)` when there was nothing to close.
    ///
    /// A failing close still leaves the connection `Disconnected`; the error
    /// is returned for the caller to report.
    pub async fn disconnect(&self) -> Result<bool, BrokerError> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Disconnected {
            return Ok(false);
        }

        self.set_state(ConnectionState::Disconnecting);
        let result = self.link.close().await;
        self.set_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                info!(role = self.role, id = %self.id, "[{}] Disconnected", self.role);
                Ok(true)
            }
            Err(e) => {
                warn!(role = self.role, "[{}] Failed to disconnect: {e}", self.role);
                Err(e)
            }
        }
    }
}

impl<L: ?Sized> fmt::Debug for Connection<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish()
    }
}
