//! Call dispatch and failover.
//!
//! Two retry layers cooperate here. `route_call` retries workers whose
//! transport rejects the CALL outright (penalizing them for 60 s).
//! `dispatch_with_retry` peeks at the first frame of the returned inbox and
//! discards attempts whose worker immediately replied with an error (the
//! voluntary BUSY rejection), without penalty.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Hub, HubError};
use crate::protocol::{CallData, Frame};

/// Cooldown applied to a worker whose transport send failed.
const SEND_FAILURE_PENALTY: Duration = Duration::from_secs(60);

/// Attempts per retry layer.
const MAX_ATTEMPTS: u32 = 3;

/// Buffer of the merger channel that splices the peeked first frame back in
/// front of the rest of the stream.
const MERGER_CAPACITY: usize = 64;

impl Hub {
    /// Choose a worker, install the request inbox, and send the CALL frame.
    ///
    /// A transport-send failure penalizes the worker for 60 s, releases the
    /// claimed slot through the same path a FINISH would, and tries the next
    /// candidate. An empty candidate set aborts immediately.
    pub async fn route_call(
        &self,
        request_id: &str,
        model: &str,
        payload: Value,
    ) -> Result<mpsc::Receiver<Frame>, HubError> {
        for _ in 0..MAX_ATTEMPTS {
            let worker = self.select_worker(model)?;

            let inbox = worker.install_inbox(request_id);
            worker.claim_slot();

            let call = Frame::Call(CallData {
                request_id: request_id.to_string(),
                model: model.to_string(),
                payload: payload.clone(),
            });

            if let Err(err) = worker.send(call).await {
                tracing::warn!(
                    worker_id = %worker.id,
                    request_id,
                    error = %err,
                    "CALL send failed, penalizing worker"
                );
                worker.penalize_until(Instant::now() + SEND_FAILURE_PENALTY);
                self.complete_task(&worker, request_id);
                continue;
            }

            return Ok(inbox);
        }

        Err(HubError::RetriesExhausted(MAX_ATTEMPTS))
    }

    /// Dispatch with first-frame failover.
    ///
    /// If the first frame out of the inbox is an ERROR (a BUSY rejection or
    /// an instant upstream failure), the attempt is thrown away and dispatch
    /// starts over on the remaining fleet. Once a non-error frame arrives it
    /// is spliced back in front of the stream and no further retry happens:
    /// from that point errors belong to the consumer.
    pub async fn dispatch_with_retry(
        &self,
        request_id: &str,
        model: &str,
        payload: Value,
    ) -> Result<mpsc::Receiver<Frame>, HubError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut inbox = match self.route_call(request_id, model, payload.clone()).await {
                Ok(inbox) => inbox,
                // Nothing to schedule onto; retrying cannot help.
                Err(err @ HubError::NoneAvailable(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(request_id, attempt, error = %err, "dispatch failed");
                    continue;
                }
            };

            let Some(first) = inbox.recv().await else {
                continue;
            };
            if matches!(first, Frame::Error(_)) {
                tracing::warn!(request_id, attempt, "worker rejected on first frame, retrying");
                continue;
            }

            let (tx, rx) = mpsc::channel(MERGER_CAPACITY);
            tokio::spawn(async move {
                if tx.send(first).await.is_err() {
                    return;
                }
                while let Some(frame) = inbox.recv().await {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            });
            return Ok(rx);
        }

        Err(HubError::RetriesExhausted(MAX_ATTEMPTS))
    }
}
