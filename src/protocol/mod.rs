//! Gateway ↔ worker wire protocol.
//!
//! Frames are JSON envelopes of the form `{"type": <kind>, "data": <body>}`
//! exchanged over a bidirectional text-frame transport. The chat-completion
//! payload itself is opaque to the gateway and conveyed verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single protocol frame.
///
/// The five kinds cover the whole worker lifecycle: `REGISTER` announces
/// capabilities, `CALL` dispatches a request, `STREAM`/`FINISH`/`ERROR`
/// carry results back. `ERROR` may flow in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Frame {
    #[serde(rename = "REGISTER")]
    Register(RegisterData),
    #[serde(rename = "CALL")]
    Call(CallData),
    #[serde(rename = "STREAM")]
    Stream(StreamData),
    #[serde(rename = "FINISH")]
    Finish(FinishData),
    #[serde(rename = "ERROR")]
    Error(ErrorData),
}

impl Frame {
    /// Request-scoped error frame.
    pub fn error(request_id: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Frame::Error(ErrorData {
            request_id: Some(request_id.into()),
            code,
            message: message.into(),
        })
    }

    /// The request id this frame belongs to, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Frame::Register(_) => None,
            Frame::Call(d) => Some(&d.request_id),
            Frame::Stream(d) => Some(&d.request_id),
            Frame::Finish(d) => Some(&d.request_id),
            Frame::Error(d) => d.request_id.as_deref(),
        }
    }
}

/// Sent by a worker right after connecting (and again to update capabilities;
/// last REGISTER wins).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterData {
    pub max_parallel: u32,
    /// Server-visible model names this worker can serve.
    pub models: Vec<String>,
}

/// Sent by the gateway to dispatch one chat completion to a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallData {
    pub request_id: String,
    pub model: String,
    /// The consumer's chat-completion body, forwarded verbatim.
    pub payload: Value,
}

/// One chunk of provider output for an in-flight request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamData {
    pub request_id: String,
    pub chunk: Value,
}

/// Marks the clean end of a request's stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishData {
    pub request_id: String,
}

/// Error report; `request_id` is absent for connection-level errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub code: u16,
    pub message: String,
}

/// Canonical chat-completion request (OpenAI schema).
///
/// Only the fields the gateway and adapters need are typed; everything else
/// passes through untouched via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A single conversation message. Content stays a raw value so multimodal
/// arrays survive passthrough; adapters that need text coerce it themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

/// Canonical streaming chunk shape, as produced by the adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
