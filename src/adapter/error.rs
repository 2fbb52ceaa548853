//! Error types for provider adapters.

use thiserror::Error;

/// Errors that can occur while running a provider call.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The forwarded payload could not be interpreted as a chat completion.
    #[error("invalid request payload: {0}")]
    Payload(String),

    /// Connection-level HTTP failure (DNS, refused, timeout).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-200 status.
    #[error("{provider} api returned status {status}")]
    UpstreamStatus { provider: &'static str, status: u16 },

    /// The provider stream broke mid-read.
    #[error("error reading stream: {0}")]
    Stream(String),
}
