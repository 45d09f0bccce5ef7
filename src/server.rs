//! HTTP ingest and WebSocket push transport.
//!
//! Routes:
//! - `GET /test?capacitance=<v>`: single reading
//! - `POST /test` with `{"capacitances": [...]}`: batch
//! - `GET /ws`: live `new_data` / `blink_rate` events as JSON text frames
//! - `GET /health`: buffer and subscriber counts
//!
//! Handlers decode first and then hand readings to the [`IngestGateway`] on the
//! blocking pool, since the durable append touches the filesystem.

use crate::broadcast::Subscription;
use crate::error::{AppResult, DaqError};
use crate::gateway::{decode_batch, parse_value_str, IngestGateway, Reading};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct ServerState {
    gateway: IngestGateway,
    shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Deserialize)]
struct SingleQuery {
    capacitance: Option<String>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `"ok"` while the server answers
    pub status: String,
    /// Samples currently held in the buffer
    pub buffered_samples: usize,
    /// Live subscribers
    pub subscribers: usize,
}

/// Build the router over `gateway`.
///
/// WebSocket loops end when `shutdown` flips to `true` or the broadcaster closes.
pub fn router(gateway: IngestGateway, shutdown: watch::Receiver<bool>) -> Router {
    Router::new()
        .route("/test", get(single_reading).post(batch_readings))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(ServerState { gateway, shutdown })
}

fn error_response(status: StatusCode, err: &DaqError) -> Response {
    let message = match err {
        DaqError::MalformedInput(msg) => msg.clone(),
        other => other.to_string(),
    };
    (status, Json(json!({ "error": message }))).into_response()
}

async fn ingest_blocking(gateway: IngestGateway, readings: Vec<Reading>) -> Result<(), DaqError> {
    tokio::task::spawn_blocking(move || {
        let report = gateway.ingest_batch(&readings);
        if report.persistence_failures > 0 {
            warn!(
                failures = report.persistence_failures,
                accepted = report.accepted,
                "some readings were not persisted"
            );
        }
    })
    .await
    .map_err(|e| DaqError::Server(format!("ingest task failed: {e}")))
}

async fn single_reading(
    State(state): State<ServerState>,
    Query(query): Query<SingleQuery>,
) -> Response {
    let raw = match query.capacitance.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.to_owned(),
        _ => return (StatusCode::OK, Json(json!({ "message": "Success" }))).into_response(),
    };

    let value = match parse_value_str(&raw) {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    match ingest_blocking(state.gateway, vec![Reading::new(value)]).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "Success" }))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn batch_readings(State(state): State<ServerState>, body: Bytes) -> Response {
    let readings = match decode_batch(&body) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let count = readings.len();

    match ingest_blocking(state.gateway, readings).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Received {count} readings") })),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".to_string(),
        buffered_samples: state.gateway.buffer().len(),
        subscribers: state.gateway.broadcaster().subscriber_count(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let subscription = state.gateway.broadcaster().subscribe();
        handle_socket(socket, subscription, state)
    })
}

async fn handle_socket(mut socket: WebSocket, mut subscription: Subscription, state: ServerState) {
    let id = subscription.id();
    let mut shutdown = state.shutdown.clone();
    info!(%id, "live client connected");

    while !*shutdown.borrow() {
        tokio::select! {
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Inbound frames carry nothing for us.
                    Some(Ok(_)) => {}
                }
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                match event.to_json() {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%id, error = %e, "failed to encode event"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    let dropped = subscription.dropped_count();
    state.gateway.broadcaster().unsubscribe(id);
    info!(%id, dropped, "live client disconnected");
}

/// A running server bound to a local address.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<AppResult<()>>>,
}

impl ServerHandle {
    /// Address actually bound, with the resolved port when 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, end live client loops and wait for the server.
    pub async fn shutdown(mut self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(true);
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| DaqError::Server(format!("server task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Bind `addr` and serve in a background task.
pub async fn spawn(addr: SocketAddr, gateway: IngestGateway) -> AppResult<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DaqError::Server(format!("failed to bind {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DaqError::Server(e.to_string()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = router(gateway, shutdown_rx.clone());

    let mut signal = shutdown_rx;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*signal.borrow() {
                    if signal.changed().await.is_err() {
                        break;
                    }
                }
                debug!("server received shutdown signal");
            })
            .await
            .map_err(|e| DaqError::Server(e.to_string()))
    });

    info!(%local_addr, "server listening");

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        handle: Some(handle),
    })
}
