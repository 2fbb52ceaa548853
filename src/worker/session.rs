//! Worker session: the long-lived client of the gateway transport.
//!
//! Dials the gateway with the configured client token, registers its
//! capabilities, and hands incoming CALL frames to the task runner. Lost
//! connections are retried with exponential backoff (2 s doubling to 32 s,
//! reset after a successful connect).

use crate::adapter::{AnthropicAdapter, OpenAiAdapter, ProviderAdapter};
use crate::config::{ProviderType, WorkerConfig};
use crate::protocol::{Frame, RegisterData};
use crate::worker::runner::{ModelRoute, TaskRunner};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Write deadline for pong replies to gateway pings.
const PONG_DEADLINE: Duration = Duration::from_secs(5);

/// Depth of the outbound frame queue shared by the runner's tasks.
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid client token: {0}")]
    Token(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("transport closed while registering")]
    RegisterFailed,
}

pub struct Session {
    config: WorkerConfig,
    routes: HashMap<String, ModelRoute>,
}

impl Session {
    pub fn new(config: WorkerConfig) -> Self {
        let routes = build_routes(&config);
        Self { config, routes }
    }

    /// Server-visible models this session advertises.
    pub fn models(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Connect-and-serve loop; returns only on shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if shutdown.is_cancelled() {
                info!("worker session shutting down");
                return;
            }

            match self.connect().await {
                Ok(stream) => {
                    info!(server_url = %self.config.server_url, "connected to gateway");
                    backoff = INITIAL_BACKOFF;
                    if let Err(err) = self.serve(stream, &shutdown).await {
                        error!(error = %err, "session ended with error");
                    }
                }
                Err(err) => {
                    error!(error = %err, backoff_secs = backoff.as_secs(), "connection failed, reconnecting");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect(
        &self,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, SessionError> {
        let mut request = self.config.server_url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Client-Token",
            HeaderValue::from_str(&self.config.client_token)?,
        );
        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    }

    /// One connected session: register, then pump frames until the transport
    /// drops or shutdown fires. In-flight adapter calls are cancelled when
    /// the session ends.
    async fn serve(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &CancellationToken,
    ) -> Result<(), SessionError> {
        let (mut sink, mut reader) = stream.split();
        let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
        let (control_tx, mut control_rx) = mpsc::channel::<Message>(8);
        let conn_cancel = shutdown.child_token();

        // Single writer over the socket: runner frames and pong replies.
        let writer_cancel = conn_cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = frame_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let json = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(err) => {
                                error!(error = %err, "failed to serialize frame");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    control = control_rx.recv() => {
                        let Some(message) = control else { break };
                        match tokio::time::timeout(PONG_DEADLINE, sink.send(message)).await {
                            Ok(Ok(())) => {}
                            _ => break,
                        }
                    }
                }
            }
            writer_cancel.cancel();
        });

        let runner = TaskRunner::new(
            self.config.max_parallel,
            self.routes.clone(),
            frame_tx.clone(),
        );

        // Advertise capabilities before accepting work.
        frame_tx
            .send(Frame::Register(RegisterData {
                max_parallel: self.config.max_parallel,
                models: self.models(),
            }))
            .await
            .map_err(|_| SessionError::RegisterFailed)?;

        let result = loop {
            let message = tokio::select! {
                _ = conn_cancel.cancelled() => break Ok(()),
                message = reader.next() => message,
            };
            match message {
                None => break Ok(()),
                Some(Err(err)) => break Err(SessionError::Transport(err)),
                Some(Ok(Message::Text(text))) => {
                    let frame: Frame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(err) => {
                            error!(error = %err, "invalid frame from gateway");
                            continue;
                        }
                    };
                    if let Frame::Call(call) = frame {
                        runner.handle_call(conn_cancel.clone(), call).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = control_tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => break Ok(()),
                Some(Ok(_)) => {}
            }
        };

        // Abort in-flight tasks and stop the writer before reconnecting.
        conn_cancel.cancel();
        let _ = writer.await;
        result
    }
}

fn build_routes(config: &WorkerConfig) -> HashMap<String, ModelRoute> {
    let client = reqwest::Client::new();
    let mut routes = HashMap::new();

    for provider in &config.providers {
        let adapter: Arc<dyn ProviderAdapter> = match provider.provider_type {
            ProviderType::Openai => Arc::new(OpenAiAdapter::new(
                provider.api_key.clone(),
                provider.base_url.clone(),
                client.clone(),
            )),
            ProviderType::Claude => Arc::new(AnthropicAdapter::new(
                provider.api_key.clone(),
                provider.base_url.clone(),
                client.clone(),
            )),
        };
        for model in &provider.models {
            routes.insert(
                model.server_mapping.clone(),
                ModelRoute {
                    provider: Arc::clone(&adapter),
                    local: model.local.clone(),
                },
            );
        }
    }

    routes
}
