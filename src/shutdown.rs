//! Process-wide graceful shutdown.
//!
//! Producers, consumers, admins and loggers register a keyed close hook. The
//! first termination signal (or explicit `shutdown()` call) runs every hook
//! exactly once; later signals and re-registrations are no-ops.

use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct ShutdownCoordinator {
    hooks: Mutex<Vec<(String, Hook)>>,
    fired: AtomicBool,
    listening: AtomicBool,
    done: CancellationToken,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            done: CancellationToken::new(),
        }
    }

    pub fn global() -> &'static ShutdownCoordinator {
        static GLOBAL: OnceLock<ShutdownCoordinator> = OnceLock::new();
        GLOBAL.get_or_init(ShutdownCoordinator::new)
    }

    /// Register a close hook under `key`. Returns `false` when the key is
    /// already registered or shutdown has already started.
    pub fn register<F, Fut>(&self, key: impl Into<String>, hook: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let mut hooks = self.hooks.lock();
        if self.fired.load(Ordering::SeqCst) || hooks.iter().any(|(k, _)| *k == key) {
            return false;
        }
        hooks.push((key, Box::new(move || hook().boxed())));
        true
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.hooks.lock().iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Run every registered hook concurrently and wait for all of them.
    /// Returns how many hooks this call ran; a second call waits for the
    /// first to finish and returns 0.
    pub async fn shutdown(&self) -> usize {
        if self.fired.swap(true, Ordering::SeqCst) {
            self.done.cancelled().await;
            return 0;
        }

        let hooks: Vec<(String, Hook)> = std::mem::take(&mut *self.hooks.lock());
        let count = hooks.len();
        info!(hooks = count, "Initiating graceful shutdown...");

        join_all(hooks.into_iter().map(|(key, hook)| async move {
            hook().await;
            info!(key = %key, "Shutdown hook completed");
        }))
        .await;

        self.done.cancel();
        info!("Graceful shutdown completed");
        count
    }

    /// Resolves once `shutdown()` has finished running the hooks.
    pub async fn cancelled(&self) {
        self.done.cancelled().await;
    }

    /// Install SIGINT/SIGTERM listeners that trigger `shutdown()`. Only the
    /// first call installs anything; returns `false` otherwise or when no
    /// tokio runtime is available.
    pub fn listen_for_signals(&'static self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        if self.listening.swap(true, Ordering::SeqCst) {
            return false;
        }

        handle.spawn(async move {
            if wait_for_signal().await {
                self.shutdown().await;
            }
        });
        true
    }
}

/// Wait for SIGINT or SIGTERM. Returns `false` if no listener could be
/// installed.
async fn wait_for_signal() -> bool {
    #[cfg(unix)]
    {
        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                return match signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                        true
                    }
                    Err(err) => {
                        error!("Failed to listen for SIGINT: {}", err);
                        false
                    }
                };
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    true
                }
                Err(err) => {
                    error!("Failed to listen for SIGINT: {}", err);
                    false
                }
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                true
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                true
            }
            Err(err) => {
                error!("Failed to listen for SIGINT: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_hooks_run_once() {
        let coordinator = ShutdownCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        assert!(coordinator.register("producer:1", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(coordinator.shutdown().await, 1);
        assert_eq!(coordinator.shutdown().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_ignored() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.register("consumer:a", || async {}));
        assert!(!coordinator.register("consumer:a", || async {}));
        assert_eq!(coordinator.len(), 1);
        assert!(coordinator.is_registered("consumer:a"));
    }

    #[tokio::test]
    async fn test_register_after_shutdown_is_rejected() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown().await;
        assert!(coordinator.is_shutting_down());
        assert!(!coordinator.register("late", || async {}));
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_all_hooks_complete_before_return() {
        let coordinator = ShutdownCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let c = calls.clone();
            coordinator.register(format!("hook:{i}"), move || async move {
                tokio::task::yield_now().await;
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(coordinator.shutdown().await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        coordinator.cancelled().await;
    }
}
