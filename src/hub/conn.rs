//! Per-worker connection record.

use crate::protocol::Frame;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::HubError;
use crate::protocol::RegisterData;

/// Capacity of each per-request inbox.
pub const INBOX_CAPACITY: usize = 10;

/// Message handed to a connection's dedicated writer task.
///
/// All outbound traffic for one worker funnels through a single queue, which
/// keeps the transport single-writer without a mutex across an await point.
#[derive(Debug)]
pub enum Outbound {
    Frame(Frame),
    Ping,
}

/// One connected worker as seen by the hub.
///
/// `max_parallel` stays 0 and the model set empty until the first REGISTER
/// frame arrives; an unregistered worker is never scheduled.
#[derive(Debug)]
pub struct WorkerConn {
    pub id: String,
    outbound: mpsc::Sender<Outbound>,
    closer: CancellationToken,
    max_parallel: AtomicU32,
    active_tasks: AtomicU32,
    models: RwLock<HashSet<String>>,
    penalty_until: Mutex<Option<Instant>>,
    pending: DashMap<String, mpsc::Sender<Frame>>,
}

/// Read-only view of a worker for the nodes API.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: String,
    pub max_parallel: u32,
    pub active_tasks: u32,
    pub supported_models: Vec<String>,
    pub penalized: bool,
}

impl WorkerConn {
    pub fn new(id: String, outbound: mpsc::Sender<Outbound>, closer: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            closer,
            max_parallel: AtomicU32::new(0),
            active_tasks: AtomicU32::new(0),
            models: RwLock::new(HashSet::new()),
            penalty_until: Mutex::new(None),
            pending: DashMap::new(),
        }
    }

    /// Apply a REGISTER frame. Last one wins: both the parallelism bound and
    /// the model set are replaced wholesale.
    pub fn apply_register(&self, reg: RegisterData) {
        self.max_parallel.store(reg.max_parallel, Ordering::SeqCst);
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        *models = reg.models.into_iter().collect();
    }

    pub fn max_parallel(&self) -> u32 {
        self.max_parallel.load(Ordering::SeqCst)
    }

    pub fn active_tasks(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub fn supports(&self, model: &str) -> bool {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(model)
    }

    pub fn supported_models(&self) -> Vec<String> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn penalize_until(&self, until: Instant) {
        *self.penalty_until.lock().unwrap_or_else(|e| e.into_inner()) = Some(until);
    }

    pub fn penalized(&self, now: Instant) -> bool {
        self.penalty_until
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some_and(|until| now < until)
    }

    pub fn penalty_until(&self) -> Option<Instant> {
        *self.penalty_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim a concurrency slot. The dispatcher claims before the CALL is
    /// queued and releases through `release_slot` on every failure branch.
    pub fn claim_slot(&self) {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Release a slot, saturating at 0 so a duplicate release can never
    /// underflow the counter.
    pub fn release_slot(&self) -> u32 {
        loop {
            let current = self.active_tasks.load(Ordering::SeqCst);
            if current == 0 {
                tracing::warn!(worker_id = %self.id, "active task counter already at 0");
                return 0;
            }
            match self.active_tasks.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return current - 1,
                Err(_) => continue,
            }
        }
    }

    /// Load ratio used by the scheduler. Callers must filter out
    /// `max_parallel == 0` first.
    pub fn load_ratio(&self) -> f64 {
        f64::from(self.active_tasks()) / f64::from(self.max_parallel())
    }

    /// Queue a frame for the writer task.
    pub async fn send(&self, frame: Frame) -> Result<(), HubError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| HubError::SendFailed(self.id.clone()))
    }

    /// Queue a transport ping; returns false when the writer is gone or the
    /// queue is backed up, either of which means the connection is dead weight.
    pub fn ping(&self) -> bool {
        self.outbound.try_send(Outbound::Ping).is_ok()
    }

    /// Ask the connection's read and write tasks to shut down.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn close_token(&self) -> CancellationToken {
        self.closer.clone()
    }

    /// Install the inbox for a new in-flight request.
    pub fn install_inbox(&self, request_id: &str) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.pending.insert(request_id.to_string(), tx);
        rx
    }

    /// Remove a request's inbox entry; dropping the sender lets the consumer
    /// drain what's buffered and then observe end-of-stream.
    pub fn remove_inbox(&self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }

    /// Drop every pending inbox, ending all in-flight consumer streams.
    pub fn clear_inboxes(&self) {
        self.pending.clear();
    }

    /// Route a worker-originated frame to its request inbox. Returns false
    /// for unknown request ids.
    pub async fn route_frame(&self, frame: Frame) -> bool {
        let Some(request_id) = frame.request_id() else {
            return false;
        };
        let Some(tx) = self.pending.get(request_id).map(|e| e.value().clone()) else {
            return false;
        };
        // A dropped receiver means the consumer went away; the frame is
        // discarded and the slot is still released on FINISH/ERROR.
        let _ = tx.send(frame).await;
        true
    }

    pub fn view(&self, now: Instant) -> NodeView {
        NodeView {
            id: self.id.clone(),
            max_parallel: self.max_parallel(),
            active_tasks: self.active_tasks(),
            supported_models: self.supported_models(),
            penalized: self.penalized(now),
        }
    }
}
