//! Worker transport endpoint.
//!
//! `GET /ws` upgrades an authenticated worker connection and wires it into
//! the hub: a dedicated writer task drains the connection's outbound queue
//! (the transport's single writer), while the read loop applies REGISTER
//! frames and routes STREAM/FINISH/ERROR frames to per-request inboxes.

use crate::api::AppState;
use crate::hub::{Outbound, WorkerConn};
use crate::protocol::Frame;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Outbound queue depth per worker connection.
const OUTBOUND_CAPACITY: usize = 64;

/// A worker that stays silent this long (no frames, no pongs) is dead.
const READ_DEADLINE: Duration = Duration::from_secs(30);

/// Deadline for one socket write; a worker that cannot absorb traffic this
/// long gets disconnected rather than stall the writer.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// GET /ws - worker transport upgrade. Requires a `Client-Token` header.
pub async fn handle(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = headers
        .get("Client-Token")
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let id = format!("{}_{}", token, &uuid::Uuid::new_v4().to_string()[..8]);
    ws.on_upgrade(move |socket| handle_socket(socket, state, id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, id: String) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let closer = CancellationToken::new();

    let conn = Arc::new(WorkerConn::new(id.clone(), outbound_tx, closer.clone()));
    state.hub.register(Arc::clone(&conn)).await;

    // Writer: the only task touching the sink.
    let writer_closer = closer.clone();
    let writer = tokio::spawn(async move {
        loop {
            let outbound = tokio::select! {
                _ = writer_closer.cancelled() => break,
                outbound = outbound_rx.recv() => match outbound {
                    Some(outbound) => outbound,
                    None => break,
                },
            };
            let message = match outbound {
                Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => Message::Text(json),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to serialize frame");
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Vec::new()),
            };
            match tokio::time::timeout(WRITE_DEADLINE, sink.send(message)).await {
                Ok(Ok(())) => {}
                _ => break,
            }
        }
        writer_closer.cancel();
    });

    // Read loop. Any inbound traffic (pongs included) refreshes the deadline.
    loop {
        let next = tokio::select! {
            _ = closer.cancelled() => break,
            next = tokio::time::timeout(READ_DEADLINE, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                warn!(worker_id = %id, "read deadline expired");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Text(text) => handle_frame(&state, &conn, &text).await,
            Message::Close(_) => break,
            // axum answers pings itself; pongs only matter for liveness.
            _ => {}
        }
    }

    closer.cancel();
    let _ = writer.await;
    state.hub.unregister(&id).await;
}

async fn handle_frame(state: &AppState, conn: &Arc<WorkerConn>, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(worker_id = %conn.id, error = %err, "invalid frame from worker");
            return;
        }
    };

    match frame {
        Frame::Register(reg) => {
            tracing::info!(
                worker_id = %conn.id,
                max_parallel = reg.max_parallel,
                models = ?reg.models,
                "worker registered"
            );
            conn.apply_register(reg);
        }
        frame @ (Frame::Stream(_) | Frame::Finish(_) | Frame::Error(_)) => {
            let terminal = matches!(frame, Frame::Finish(_) | Frame::Error(_));
            let request_id = frame.request_id().map(str::to_string);

            if !conn.route_frame(frame).await {
                warn!(worker_id = %conn.id, request_id = ?request_id, "frame for unknown stream");
            }
            // FINISH and ERROR release the worker's concurrency slot.
            if terminal {
                if let Some(request_id) = request_id {
                    state.hub.complete_task(conn, &request_id);
                }
            }
        }
        // CALL only ever flows gateway → worker.
        Frame::Call(_) => {}
    }
}
