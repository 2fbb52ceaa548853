//! Shared test utilities for Switchboard integration tests.
//!
//! Provides in-memory key store and rate limiter implementations, a gateway
//! spawned on a real listener, and scripted fake workers speaking the wire
//! protocol over a genuine WebSocket connection.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use switchboard::api::{create_router, AppState};
use switchboard::auth::{ApiKeyRecord, AuthError, KeyStore};
use switchboard::hub::Hub;
use switchboard::limiter::{LimiterError, RateLimiter};
use switchboard::protocol::{Frame, RegisterData, StreamData};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub const TEST_API_KEY: &str = "sk-test-key";
pub const TEST_CLIENT_TOKEN: &str = "client-token-1";

// =============================================================================
// In-memory external collaborators
// =============================================================================

/// Key store backed by a plain map.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: HashMap<String, ApiKeyRecord>,
}

impl MemoryKeyStore {
    pub fn with_key(key: &str, allowed_models: &str, rpm: i32) -> Self {
        let mut keys = HashMap::new();
        keys.insert(
            key.to_string(),
            ApiKeyRecord {
                api_key: key.to_string(),
                allowed_models: allowed_models.to_string(),
                rpm,
            },
        );
        Self { keys }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, key: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        Ok(self.keys.get(key).cloned())
    }
}

/// Rate limiter counting requests per key without any window expiry; tests
/// are far shorter than a minute.
#[derive(Default)]
pub struct MemoryRateLimiter {
    counts: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str, rpm: i32) -> Result<bool, LimiterError> {
        if rpm <= 0 {
            return Ok(false);
        }
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count <= i64::from(rpm))
    }
}

// =============================================================================
// Gateway under test
// =============================================================================

pub struct TestGateway {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub cancel: CancellationToken,
}

impl TestGateway {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bind the gateway on an ephemeral port with the default test key
/// (`TEST_API_KEY`, all models allowed, generous rate budget).
pub async fn spawn_gateway() -> TestGateway {
    spawn_gateway_with(MemoryKeyStore::with_key(TEST_API_KEY, "*", 10_000)).await
}

pub async fn spawn_gateway_with(keys: MemoryKeyStore) -> TestGateway {
    let hub = Arc::new(Hub::new());
    let cancel = CancellationToken::new();
    hub.start(cancel.clone());

    let state = Arc::new(AppState::new(
        Arc::clone(&hub),
        Arc::new(keys),
        Arc::new(MemoryRateLimiter::default()),
    ));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestGateway { addr, hub, cancel }
}

// =============================================================================
// Scripted fake workers
// =============================================================================

/// What a fake worker does with each CALL it receives.
#[derive(Clone)]
pub enum WorkerBehavior {
    /// Stream one chunk per text, then FINISH. When a gate is given, wait
    /// for one permit before any output (lets tests observe in-flight load).
    StreamText {
        chunks: Vec<String>,
        gate: Option<Arc<Semaphore>>,
    },
    /// Send one STREAM frame carrying the whole object, then FINISH
    /// (the non-streaming contract).
    Respond(Value),
    /// Stream the chunks, then fail with ERROR instead of FINISH.
    StreamThenError { chunks: Vec<String>, code: u16 },
    /// Immediately reject with the BUSY error.
    Busy,
    /// Accept the CALL and never answer.
    Hang,
}

pub struct FakeWorker {
    task: JoinHandle<()>,
}

impl FakeWorker {
    /// Tear the transport down mid-flight.
    pub fn kill(self) {
        self.task.abort();
    }
}

/// Connect a scripted worker to the gateway and register its capabilities.
pub async fn spawn_worker(
    gateway: &TestGateway,
    max_parallel: u32,
    models: &[&str],
    behavior: WorkerBehavior,
) -> FakeWorker {
    let mut request = gateway.ws_url().into_client_request().unwrap();
    request.headers_mut().insert(
        "Client-Token",
        HeaderValue::from_str(TEST_CLIENT_TOKEN).unwrap(),
    );
    let (stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let (mut sink, mut reader) = stream.split();

    let register = Frame::Register(RegisterData {
        max_parallel,
        models: models.iter().map(|m| m.to_string()).collect(),
    });
    sink.send(Message::Text(serde_json::to_string(&register).unwrap()))
        .await
        .unwrap();

    let task = tokio::spawn(async move {
        while let Some(Ok(message)) = reader.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(Frame::Call(call)) = serde_json::from_str::<Frame>(&text) else {
                continue;
            };

            let frames = match &behavior {
                WorkerBehavior::StreamText { chunks, gate } => {
                    if let Some(gate) = gate {
                        gate.acquire().await.unwrap().forget();
                    }
                    let mut frames: Vec<Frame> = chunks
                        .iter()
                        .map(|text| {
                            Frame::Stream(StreamData {
                                request_id: call.request_id.clone(),
                                chunk: chunk_with_content(&call.request_id, &call.model, text),
                            })
                        })
                        .collect();
                    frames.push(Frame::Finish(switchboard::protocol::FinishData {
                        request_id: call.request_id.clone(),
                    }));
                    frames
                }
                WorkerBehavior::Respond(object) => vec![
                    Frame::Stream(StreamData {
                        request_id: call.request_id.clone(),
                        chunk: object.clone(),
                    }),
                    Frame::Finish(switchboard::protocol::FinishData {
                        request_id: call.request_id.clone(),
                    }),
                ],
                WorkerBehavior::StreamThenError { chunks, code } => {
                    let mut frames: Vec<Frame> = chunks
                        .iter()
                        .map(|text| {
                            Frame::Stream(StreamData {
                                request_id: call.request_id.clone(),
                                chunk: chunk_with_content(&call.request_id, &call.model, text),
                            })
                        })
                        .collect();
                    frames.push(Frame::error(&call.request_id, *code, "upstream exploded"));
                    frames
                }
                WorkerBehavior::Busy => vec![Frame::error(
                    &call.request_id,
                    503,
                    "BUSY: Local concurrency limit reached",
                )],
                WorkerBehavior::Hang => vec![],
            };

            for frame in frames {
                let text = serde_json::to_string(&frame).unwrap();
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
        }
    });

    FakeWorker { task }
}

/// Canonical streaming chunk carrying one piece of delta text.
pub fn chunk_with_content(request_id: &str, model: &str, text: &str) -> Value {
    json!({
        "id": request_id,
        "object": "chat.completion.chunk",
        "created": 1700000000,
        "model": model,
        "choices": [{"index": 0, "delta": {"content": text}}]
    })
}

// =============================================================================
// Polling helpers
// =============================================================================

/// Poll until the hub advertises `model`, i.e. the worker's REGISTER landed.
pub async fn wait_for_model(gateway: &TestGateway, model: &str) {
    wait_until(|| gateway.hub.list_models().iter().any(|m| m == model)).await;
}

pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !predicate() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Extract the `data:` payloads from an SSE body.
pub fn sse_data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}
