//! Anthropic-style adapter.
//!
//! Translates between the canonical schema and the Anthropic Messages API:
//! system messages hoist to the top-level `system` field, message content is
//! coerced to text, and the named-event stream maps back onto canonical
//! `chat.completion.chunk` objects.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{send_chunk, AdapterError, LineBuffer, ProviderAdapter};
use crate::protocol::{ChatCompletionChunk, ChatCompletionRequest, ChunkChoice, ChunkDelta};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The provider rejects requests without `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

/// Messages API request body.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

/// The slice of a `content_block_delta` event the translation needs.
#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaBody,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: Option<String>, client: reqwest::Client) -> Self {
        let base_url = base_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Build the provider body from a canonical request.
    ///
    /// The upstream call always streams; when the consumer asked for a
    /// non-streaming completion the deltas are assembled after the fact.
    fn translate_request(model: &str, req: &ChatCompletionRequest) -> AnthropicRequest {
        let mut system = None;
        let mut messages = Vec::new();

        for message in &req.messages {
            let text = coerce_content(&message.content);
            if message.role == "system" {
                system = Some(text);
            } else {
                messages.push(AnthropicMessage {
                    role: message.role.clone(),
                    content: text,
                });
            }
        }

        AnthropicRequest {
            model: model.to_string(),
            system,
            messages,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream: true,
            temperature: req.temperature,
        }
    }

    fn delta_chunk(request_id: &str, model: &str, text: String) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: request_id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(text),
                },
                finish_reason: None,
            }],
        }
    }

    /// Assemble the accumulated text into one non-streaming response object.
    fn assembled_response(request_id: &str, model: &str, content: String) -> Value {
        json!({
            "id": request_id,
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }
}

/// String content passes through; anything structured (image parts and the
/// like) is JSON-stringified.
fn coerce_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn call(
        &self,
        cancel: CancellationToken,
        request_id: &str,
        model: &str,
        payload: Value,
        chunks: mpsc::Sender<Value>,
    ) -> Result<(), AdapterError> {
        let req: ChatCompletionRequest =
            serde_json::from_value(payload).map_err(|e| AdapterError::Payload(e.to_string()))?;
        let want_stream = req.stream;
        let body = Self::translate_request(model, &req);

        let url = format!("{}/messages", self.base_url);
        tracing::info!(request_id, url = %url, model, "calling anthropic upstream");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AdapterError::UpstreamStatus {
                provider: "claude",
                status: status.as_u16(),
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = LineBuffer::new();
        let mut event_type = String::new();
        let mut assembled = String::new();

        while let Some(next) = byte_stream.next().await {
            let bytes = next.map_err(|e| AdapterError::Stream(e.to_string()))?;
            for line in buffer.push(&bytes) {
                if let Some(name) = line.strip_prefix("event: ") {
                    event_type = name.to_string();
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };

                match event_type.as_str() {
                    "content_block_delta" => {
                        let Ok(event) = serde_json::from_str::<ContentBlockDelta>(data) else {
                            continue;
                        };
                        if event.delta.delta_type != "text_delta" {
                            continue;
                        }
                        if want_stream {
                            let chunk =
                                Self::delta_chunk(request_id, model, event.delta.text);
                            let chunk = serde_json::to_value(chunk)
                                .map_err(|e| AdapterError::Stream(e.to_string()))?;
                            if !send_chunk(&cancel, &chunks, chunk).await {
                                return Ok(());
                            }
                        } else {
                            assembled.push_str(&event.delta.text);
                        }
                    }
                    "message_stop" => {
                        if !want_stream {
                            let object =
                                Self::assembled_response(request_id, model, assembled);
                            send_chunk(&cancel, &chunks, object).await;
                        }
                        return Ok(());
                    }
                    "error" => {
                        tracing::error!(request_id, data, "anthropic stream reported error");
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canonical(body: Value) -> ChatCompletionRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_system_message_hoisted_and_max_tokens_defaulted() {
        let req = canonical(json!({
            "model": "m1",
            "messages": [
                {"role": "system", "content": "S"},
                {"role": "user", "content": "U"}
            ]
        }));
        let body = AnthropicAdapter::translate_request("claude-local", &req);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["system"], "S");
        assert_eq!(json["messages"], json!([{"role": "user", "content": "U"}]));
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["stream"], true);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_explicit_max_tokens_and_temperature_kept() {
        let req = canonical(json!({
            "model": "m1",
            "messages": [{"role": "user", "content": "U"}],
            "max_tokens": 100,
            "temperature": 0.25
        }));
        let body = AnthropicAdapter::translate_request("claude-local", &req);
        assert_eq!(body.max_tokens, 100);
        assert_eq!(body.temperature, Some(0.25));
    }

    #[test]
    fn test_structured_content_is_stringified() {
        let req = canonical(json!({
            "model": "m1",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "look"}]}
            ]
        }));
        let body = AnthropicAdapter::translate_request("claude-local", &req);
        assert_eq!(
            body.messages[0].content,
            r#"[{"type":"text","text":"look"}]"#
        );
    }

    #[test]
    fn test_delta_chunk_shape() {
        let chunk = AnthropicAdapter::delta_chunk("req-1", "m1", "hi".to_string());
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["index"], 0);
        assert_eq!(json["choices"][0]["delta"]["content"], "hi");
        assert!(json["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn test_assembled_response_shape() {
        let object = AnthropicAdapter::assembled_response("req-1", "m1", "ab".to_string());
        assert_eq!(object["object"], "chat.completion");
        assert_eq!(object["choices"][0]["message"]["content"], "ab");
        assert_eq!(object["choices"][0]["finish_reason"], "stop");
    }
}
