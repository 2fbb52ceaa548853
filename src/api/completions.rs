//! Chat completions endpoint handler.
//!
//! The gateway extracts only `model` and `stream` from the body; everything
//! else is forwarded verbatim to whichever worker wins dispatch.

use crate::api::{ApiError, AppState};
use crate::auth::ApiKeyRecord;
use crate::protocol::{ChatCompletionRequest, Frame};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// POST /v1/chat/completions
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key_record = authorize(&state, &headers).await?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Invalid JSON body"))?;
    let probe: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Invalid chat completion body"))?;

    if !key_record.allows_model(&probe.model) {
        return Err(ApiError::forbidden(&format!(
            "Model {} not allowed for this API key",
            probe.model
        )));
    }

    let request_id = format!("req-{}", uuid::Uuid::new_v4());
    info!(request_id, model = %probe.model, stream = probe.stream, "chat completion request");

    let inbox = state
        .hub
        .dispatch_with_retry(&request_id, &probe.model, payload)
        .await
        .map_err(|e| ApiError::service_unavailable(&e.to_string()))?;

    if probe.stream {
        Ok(stream_response(inbox))
    } else {
        non_stream_response(inbox).await
    }
}

/// Validate the bearer key and charge the rate limiter. Either failure
/// short-circuits before anything is dispatched.
async fn authorize(state: &Arc<AppState>, headers: &HeaderMap) -> Result<ApiKeyRecord, ApiError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(api_key) = auth.strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "Missing or invalid Authorization header",
        ));
    };

    let record = match state.keys.get(api_key).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(ApiError::unauthorized("Invalid API key")),
        Err(err) => {
            error!(error = %err, "key store lookup failed");
            return Err(ApiError::unauthorized("Invalid API key"));
        }
    };

    match state.limiter.allow(api_key, record.rpm).await {
        Ok(true) => Ok(record),
        Ok(false) => Err(ApiError::rate_limited()),
        Err(err) => {
            error!(error = %err, "rate limiter error");
            Err(ApiError::internal("Internal error"))
        }
    }
}

/// Pipe the request inbox to the consumer as server-sent events.
///
/// STREAM frames become `data: <chunk>` lines, an ERROR frame becomes a
/// `data: {"error": ...}` line, FINISH becomes the `[DONE]` terminator.
/// Dropping the response (consumer disconnect) stops the drain; the worker's
/// slot is still released when its terminal frame reaches the read loop.
fn stream_response(mut inbox: mpsc::Receiver<Frame>) -> Response {
    let stream = async_stream::stream! {
        while let Some(frame) = inbox.recv().await {
            match frame {
                Frame::Finish(_) => {
                    yield Ok::<Event, Infallible>(Event::default().data("[DONE]"));
                    break;
                }
                Frame::Error(err) => {
                    let body = serde_json::to_string(&json!({"error": err}))
                        .unwrap_or_default();
                    yield Ok(Event::default().data(body));
                    break;
                }
                Frame::Stream(data) => {
                    let body = serde_json::to_string(&data.chunk).unwrap_or_default();
                    yield Ok(Event::default().data(body));
                }
                _ => {}
            }
        }
    };

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// Collect the single response object of a non-streaming request.
async fn non_stream_response(mut inbox: mpsc::Receiver<Frame>) -> Result<Response, ApiError> {
    match inbox.recv().await {
        // The first chunk carries the entire upstream response.
        Some(Frame::Stream(data)) => Ok(Json(data.chunk).into_response()),
        Some(Frame::Error(err)) => Err(ApiError::upstream(err.code, &err.message)),
        Some(Frame::Finish(_)) => Err(ApiError::internal("Stream finished before returning data")),
        Some(_) => Err(ApiError::internal("Unexpected frame on request stream")),
        None => Err(ApiError::internal("Stream closed prematurely")),
    }
}
