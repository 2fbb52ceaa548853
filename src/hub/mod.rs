//! Worker-fleet hub.
//!
//! The hub is the only shared mutable registry in the gateway: it tracks
//! connected workers, their advertised capabilities and live load, schedules
//! requests onto the least-loaded eligible worker, and owns the failover
//! policy. Membership changes flow through a single-writer event loop; reads
//! (scheduling, status queries) go straight to the concurrent map.

mod conn;
mod dispatcher;
mod error;
mod scheduler;

pub use conn::{NodeView, Outbound, WorkerConn, INBOX_CAPACITY};
pub use error::HubError;

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval between transport-level pings to every worker.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Membership event consumed by the hub loop.
enum HubEvent {
    Register(Arc<WorkerConn>),
    Unregister(String),
}

/// Process-wide registry of connected workers.
pub struct Hub {
    workers: DashMap<String, Arc<WorkerConn>>,
    events: mpsc::Sender<HubEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<HubEvent>>>,
}

impl Hub {
    pub fn new() -> Self {
        let (events, rx) = mpsc::channel(64);
        Self {
            workers: DashMap::new(),
            events,
            events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Spawn the hub loop: the sole mutator of registry membership, plus the
    /// periodic liveness ping.
    ///
    /// # Panics
    ///
    /// Panics if called twice; the loop owns the event receiver.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = self
            .events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("hub loop already started");
        let hub = Arc::clone(self);
        tokio::spawn(async move { hub.run(rx, cancel).await })
    }

    async fn run(&self, mut events: mpsc::Receiver<HubEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(HubEvent::Register(conn)) => {
                        tracing::info!(worker_id = %conn.id, "worker connected");
                        self.workers.insert(conn.id.clone(), conn);
                    }
                    Some(HubEvent::Unregister(id)) => {
                        if let Some((_, conn)) = self.workers.remove(&id) {
                            tracing::info!(worker_id = %id, "worker disconnected");
                            conn.clear_inboxes();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.ping_all(),
                _ = cancel.cancelled() => break,
            }
        }
    }

    fn ping_all(&self) {
        for entry in self.workers.iter() {
            let conn = entry.value();
            if !conn.ping() {
                tracing::warn!(worker_id = %conn.id, "ping failed, closing transport");
                conn.close();
            }
        }
    }

    /// Announce a new connection to the hub loop.
    pub async fn register(&self, conn: Arc<WorkerConn>) {
        let _ = self.events.send(HubEvent::Register(conn)).await;
    }

    /// Announce a closed connection to the hub loop.
    pub async fn unregister(&self, id: &str) {
        let _ = self.events.send(HubEvent::Unregister(id.to_string())).await;
    }

    /// Release the concurrency slot a request held on its worker. The
    /// decrement is gated on the inbox entry still being present, so a
    /// FINISH and a stray duplicate ERROR release exactly once.
    pub fn complete_task(&self, conn: &WorkerConn, request_id: &str) {
        if conn.remove_inbox(request_id) {
            conn.release_slot();
        }
    }

    /// Model names currently advertised by at least one registered,
    /// non-penalized worker. Derived on demand, never stored.
    pub fn list_models(&self) -> Vec<String> {
        let now = Instant::now();
        let mut seen = std::collections::HashSet::new();
        for entry in self.workers.iter() {
            let conn = entry.value();
            if conn.max_parallel() == 0 || conn.penalized(now) {
                continue;
            }
            seen.extend(conn.supported_models());
        }
        seen.into_iter().collect()
    }

    /// Read-only view of every connected worker for the nodes API.
    pub fn nodes(&self) -> Vec<NodeView> {
        let now = Instant::now();
        self.workers
            .iter()
            .map(|entry| entry.value().view(now))
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn get_worker(&self, id: &str) -> Option<Arc<WorkerConn>> {
        self.workers.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Direct insertion, bypassing the hub loop. Test-only seam so scheduler
    /// and dispatcher behavior can be exercised without a running loop.
    #[doc(hidden)]
    pub fn insert_worker(&self, conn: Arc<WorkerConn>) {
        self.workers.insert(conn.id.clone(), conn);
    }

    pub(crate) fn iter_workers(&self) -> impl Iterator<Item = Arc<WorkerConn>> + '_ {
        self.workers.iter().map(|e| Arc::clone(e.value()))
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
