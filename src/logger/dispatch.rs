use crate::domain::RenderedEntry;
use crate::transport::{BrokerTransport, Delivery, FALLBACK_TARGET};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Detached broker delivery.
///
/// Log calls push onto a bounded queue and return; one worker task drains it
/// in submission order, running each entry's retry loop. A full queue drops
/// the new entry instead of blocking the caller.
pub(crate) struct BrokerDispatcher {
    tx: mpsc::Sender<Arc<RenderedEntry>>,
    pending: Arc<watch::Sender<usize>>,
    dropped: Arc<AtomicU64>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    transport: Arc<BrokerTransport>,
}

impl BrokerDispatcher {
    pub(crate) fn spawn(runtime: &Handle, transport: BrokerTransport, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(watch::Sender::new(0usize));
        let dropped = Arc::new(AtomicU64::new(0));
        let token = CancellationToken::new();
        let transport = Arc::new(transport);

        let worker = runtime.spawn(run_worker(
            rx,
            transport.clone(),
            pending.clone(),
            dropped.clone(),
            token.clone(),
        ));

        Self {
            tx,
            pending,
            dropped,
            token,
            worker: Mutex::new(Some(worker)),
            transport,
        }
    }

    pub(crate) fn dispatch(&self, entry: Arc<RenderedEntry>) {
        self.pending.send_modify(|n| *n += 1);
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: FALLBACK_TARGET,
                    service = %entry.entry.service,
                    "Broker queue full, dropping log entry"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                debug!("Broker sink closed, entry not shipped");
            }
        }
    }

    /// Entries dropped so far, by queue overflow or retry exhaustion.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn transport(&self) -> &BrokerTransport {
        &self.transport
    }

    /// Wait until every queued entry has been delivered or dropped.
    pub(crate) async fn flush(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop the worker, abandoning queued and in-flight entries, then close
    /// the producer connection.
    pub(crate) async fn shutdown(&self) {
        self.token.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Broker dispatch worker ended abnormally: {e}");
            }
        }
        self.pending.send_replace(0);

        if let Err(e) = self.transport.disconnect().await {
            error!(target: FALLBACK_TARGET, "Failed to disconnect broker sink: {e}");
        }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Arc<RenderedEntry>>,
    transport: Arc<BrokerTransport>,
    pending: Arc<watch::Sender<usize>>,
    dropped: Arc<AtomicU64>,
    token: CancellationToken,
) {
    debug!(topic = transport.topic(), "Broker dispatch worker started");

    loop {
        let entry = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(entry) => entry,
                None => break,
            },
        };

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            delivery = transport.send(&entry) => {
                if let Delivery::Dropped { .. } = delivery {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    rx.close();
    let abandoned = rx.len();
    if abandoned > 0 {
        warn!(
            target: FALLBACK_TARGET,
            abandoned, "Broker sink stopped with entries still queued"
        );
    }
    info!("Broker dispatch worker stopped");
}
