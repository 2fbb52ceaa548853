//! Full-chain tests: consumer HTTP → gateway → real worker session → mock
//! provider. Exercises the production worker code (session, runner,
//! adapters) instead of a scripted fake.

mod common;

use common::{sse_data_lines, spawn_gateway, wait_for_model, TEST_API_KEY, TEST_CLIENT_TOKEN};
use serde_json::{json, Value};
use switchboard::config::{ModelMapping, ProviderConfig, ProviderType, WorkerConfig};
use switchboard::worker::Session;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn worker_config(gateway: &common::TestGateway, upstream: &MockServer) -> WorkerConfig {
    WorkerConfig {
        client_token: TEST_CLIENT_TOKEN.to_string(),
        server_url: gateway.ws_url(),
        max_parallel: 2,
        providers: vec![ProviderConfig {
            provider_type: ProviderType::Openai,
            api_key: "sk-upstream".to_string(),
            base_url: Some(upstream.uri()),
            models: vec![ModelMapping {
                local: "local-model".to_string(),
                server_mapping: "pro-model".to_string(),
            }],
        }],
    }
}

fn openai_sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for (i, content) in chunks.iter().enumerate() {
        body.push_str(&format!(
            "data: {{\"id\":\"chatcmpl-{i}\",\"object\":\"chat.completion.chunk\",\"created\":1699999999,\"model\":\"local-model\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{content}\"}}}}]}}\n\n"
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn test_streaming_through_real_worker() {
    let gateway = spawn_gateway().await;
    let upstream = MockServer::start().await;

    // The worker must substitute the provider-local model name.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "local-model", "stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(openai_sse_body(&["a", "b"]))
                .insert_header("content-type", "text/event-stream"),
        )
        .mount(&upstream)
        .await;

    let session = Session::new(worker_config(&gateway, &upstream));
    let cancel = CancellationToken::new();
    let session_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run(cancel).await })
    };
    wait_for_model(&gateway, "pro-model").await;

    let response = reqwest::Client::new()
        .post(gateway.http_url("/v1/chat/completions"))
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .json(&json!({
            "model": "pro-model",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    let lines = sse_data_lines(&body);
    assert_eq!(lines.len(), 3, "unexpected SSE body: {body}");
    let first: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first["choices"][0]["delta"]["content"], "a");
    let second: Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(second["choices"][0]["delta"]["content"], "b");
    assert_eq!(lines[2], "[DONE]");

    cancel.cancel();
    session_task.await.unwrap();
}

#[tokio::test]
async fn test_non_streaming_through_real_worker() {
    let gateway = spawn_gateway().await;
    let upstream = MockServer::start().await;

    let upstream_response = json!({
        "id": "chatcmpl-7",
        "object": "chat.completion",
        "created": 1699999999,
        "model": "local-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hello"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "local-model", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_response.clone()))
        .mount(&upstream)
        .await;

    let session = Session::new(worker_config(&gateway, &upstream));
    let cancel = CancellationToken::new();
    let session_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run(cancel).await })
    };
    wait_for_model(&gateway, "pro-model").await;

    let response = reqwest::Client::new()
        .post(gateway.http_url("/v1/chat/completions"))
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .json(&json!({
            "model": "pro-model",
            "stream": false,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, upstream_response);

    cancel.cancel();
    session_task.await.unwrap();
}

#[tokio::test]
async fn test_upstream_failure_reaches_consumer_as_503() {
    let gateway = spawn_gateway().await;
    let upstream = MockServer::start().await;

    // The provider refuses every call; the worker's first frame is always an
    // ERROR, so the gateway exhausts its retries.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("provider down"))
        .mount(&upstream)
        .await;

    let session = Session::new(worker_config(&gateway, &upstream));
    let cancel = CancellationToken::new();
    let session_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run(cancel).await })
    };
    wait_for_model(&gateway, "pro-model").await;

    let response = reqwest::Client::new()
        .post(gateway.http_url("/v1/chat/completions"))
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .json(&json!({
            "model": "pro-model",
            "stream": false,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    cancel.cancel();
    session_task.await.unwrap();
}
