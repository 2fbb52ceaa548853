//! Provider adapters.
//!
//! An adapter translates a canonical chat-completion request into one
//! provider's wire format, and decodes the provider's output back into the
//! canonical chunk shape. Implementations are chosen at configuration time
//! and dispatched through `Arc<dyn ProviderAdapter>`.

mod anthropic;
mod error;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use error::AdapterError;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Unified interface over upstream AI providers.
///
/// `call` runs one chat completion. Decoded canonical chunks go out through
/// `chunks`; dropping the sender (by returning) marks the end of the stream.
/// When the canonical request has `stream=false`, exactly one value — the
/// whole provider response object — is emitted. A cancelled token means the
/// worker lost its gateway transport: implementations stop promptly and must
/// never block on a chunk send once cancellation fired.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Provider name as used in worker configuration (e.g. "openai").
    fn name(&self) -> &'static str;

    async fn call(
        &self,
        cancel: CancellationToken,
        request_id: &str,
        model: &str,
        payload: Value,
        chunks: mpsc::Sender<Value>,
    ) -> Result<(), AdapterError>;
}

/// Incremental splitter for SSE bodies that arrive in arbitrary byte chunks.
pub(crate) struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Feed raw bytes, returning every completed line (trimmed, non-empty).
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim().to_string();
            self.buf.drain(..=pos);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

/// Send one chunk unless the worker has been cancelled. Returns false when
/// the call should stop (cancellation or a consumer that went away).
pub(crate) async fn send_chunk(
    cancel: &CancellationToken,
    chunks: &mpsc::Sender<Value>,
    chunk: Value,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = chunks.send(chunk) => sent.is_ok(),
    }
}
