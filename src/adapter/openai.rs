//! OpenAI-style adapter.
//!
//! The upstream already speaks the canonical schema, so translation is
//! limited to substituting the provider-local model name; chunks are
//! forwarded verbatim.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{send_chunk, AdapterError, LineBuffer, ProviderAdapter};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiAdapter {
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
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn call(
        &self,
        cancel: CancellationToken,
        request_id: &str,
        model: &str,
        payload: Value,
        chunks: mpsc::Sender<Value>,
    ) -> Result<(), AdapterError> {
        let mut body = payload;
        if !body.is_object() {
            return Err(AdapterError::Payload("payload is not an object".to_string()));
        }
        body["model"] = Value::String(model.to_string());
        let stream = body
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let url = format!("{}/chat/completions", self.base_url);
        tracing::info!(request_id, url = %url, model, stream, "calling openai upstream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AdapterError::UpstreamStatus {
                provider: "openai",
                status: status.as_u16(),
            });
        }

        if !stream {
            // The whole completion arrives as one JSON object; forward it as
            // the single chunk of this request.
            let object = response.json::<Value>().await?;
            send_chunk(&cancel, &chunks, object).await;
            return Ok(());
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = LineBuffer::new();

        while let Some(next) = byte_stream.next().await {
            let bytes = next.map_err(|e| AdapterError::Stream(e.to_string()))?;
            for line in buffer.push(&bytes) {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }
                let chunk: Value = match serde_json::from_str(data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        tracing::warn!(request_id, error = %err, "skipping malformed chunk");
                        continue;
                    }
                };
                if !send_chunk(&cancel, &chunks, chunk).await {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}
