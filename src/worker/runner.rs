//! Worker-side task runner.
//!
//! Enforces the locally advertised parallelism bound and runs one adapter
//! call per accepted CALL frame. Rejections and results all travel back
//! through the session's single outbound frame queue.

use crate::adapter::ProviderAdapter;
use crate::protocol::{CallData, Frame, FinishData, StreamData};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolved route for one server-visible model name.
#[derive(Clone)]
pub struct ModelRoute {
    pub provider: Arc<dyn ProviderAdapter>,
    pub local: String,
}

pub struct TaskRunner {
    max_parallel: u32,
    active: AtomicU32,
    routes: HashMap<String, ModelRoute>,
    outbound: mpsc::Sender<Frame>,
}

/// Releases the concurrency slot when the task ends, panics included.
struct SlotGuard(Arc<TaskRunner>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskRunner {
    pub fn new(
        max_parallel: u32,
        routes: HashMap<String, ModelRoute>,
        outbound: mpsc::Sender<Frame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            max_parallel,
            active: AtomicU32::new(0),
            routes,
            outbound,
        })
    }

    pub fn active_tasks(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    /// Admit or reject a CALL. A saturated runner answers ERROR 503 without
    /// claiming a slot; otherwise the call runs as its own task.
    pub async fn handle_call(self: &Arc<Self>, cancel: CancellationToken, call: CallData) {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= self.max_parallel {
                let _ = self
                    .outbound
                    .send(Frame::error(
                        &call.request_id,
                        503,
                        "BUSY: Local concurrency limit reached",
                    ))
                    .await;
                return;
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let _slot = SlotGuard(Arc::clone(&runner));
            runner.execute(cancel, call).await;
        });
    }

    /// Run one adapter call, forwarding chunks as STREAM frames and closing
    /// with exactly one of FINISH or ERROR.
    async fn execute(&self, cancel: CancellationToken, call: CallData) {
        info!(request_id = %call.request_id, model = %call.model, "executing task");

        let Some(route) = self.routes.get(&call.model) else {
            let _ = self
                .outbound
                .send(Frame::error(
                    &call.request_id,
                    400,
                    "Model not supported natively by this client",
                ))
                .await;
            return;
        };

        let (chunk_tx, mut chunk_rx) = mpsc::channel(16);
        let task_cancel = cancel.child_token();

        let adapter = Arc::clone(&route.provider);
        let local_model = route.local.clone();
        let request_id = call.request_id.clone();
        let adapter_cancel = task_cancel.clone();
        let adapter_task = tokio::spawn(async move {
            adapter
                .call(
                    adapter_cancel,
                    &request_id,
                    &local_model,
                    call.payload,
                    chunk_tx,
                )
                .await
        });

        while let Some(chunk) = chunk_rx.recv().await {
            let frame = Frame::Stream(StreamData {
                request_id: call.request_id.clone(),
                chunk,
            });
            if self.outbound.send(frame).await.is_err() {
                // Transport gone; unblock the adapter and drop the rest.
                task_cancel.cancel();
                while chunk_rx.recv().await.is_some() {}
                break;
            }
        }

        let terminal = match adapter_task.await {
            Ok(Ok(())) => Frame::Finish(FinishData {
                request_id: call.request_id.clone(),
            }),
            Ok(Err(err)) => {
                error!(request_id = %call.request_id, error = %err, "adapter error");
                Frame::error(&call.request_id, 500, err.to_string())
            }
            Err(join_err) => {
                error!(request_id = %call.request_id, error = %join_err, "adapter task died");
                Frame::error(&call.request_id, 500, "internal adapter failure")
            }
        };
        let _ = self.outbound.send(terminal).await;
    }
}
