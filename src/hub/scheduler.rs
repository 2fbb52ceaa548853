//! Least-loaded worker selection.

use std::sync::Arc;
use tokio::time::Instant;

use super::{Hub, HubError, WorkerConn};

impl Hub {
    /// Pick the worker with the lowest `active/max` load ratio among those
    /// that advertise `model`, are past any penalty, and have a free slot.
    /// The first candidate encountered wins ties.
    pub fn select_worker(&self, model: &str) -> Result<Arc<WorkerConn>, HubError> {
        let now = Instant::now();
        let mut best: Option<(Arc<WorkerConn>, f64)> = None;

        for conn in self.iter_workers() {
            if !conn.supports(model) {
                continue;
            }
            if conn.penalized(now) {
                continue;
            }
            let max = conn.max_parallel();
            if max == 0 {
                // Not registered yet.
                continue;
            }
            if conn.active_tasks() >= max {
                // Fully booked.
                continue;
            }
            let ratio = conn.load_ratio();
            if best.as_ref().is_none_or(|(_, lowest)| ratio < *lowest) {
                best = Some((conn, ratio));
            }
        }

        best.map(|(conn, _)| conn)
            .ok_or_else(|| HubError::NoneAvailable(model.to_string()))
    }
}
