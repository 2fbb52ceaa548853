//! Error types for hub operations.

use thiserror::Error;

/// Errors surfaced by scheduling and dispatch.
#[derive(Error, Debug)]
pub enum HubError {
    /// No registered, non-penalized worker with free capacity advertises the model.
    #[error("no available workers for model: {0}")]
    NoneAvailable(String),

    /// Queuing a frame onto the worker's transport failed (writer gone).
    #[error("transport send to worker '{0}' failed")]
    SendFailed(String),

    /// Every dispatch attempt was consumed without a usable stream.
    #[error("no available workers after {0} retries")]
    RetriesExhausted(u32),
}
