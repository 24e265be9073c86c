//! HTTP surface of the host: lifecycle routes plus the console WebSocket.
//!
//! `POST /server/:id/{start,stop,restart}` answer with a `LifecycleResponse`
//! body; `GET /server/:id` upgrades to a WebSocket carrying raw text lines in
//! both directions (one message = one line). Stdout lines travel as text
//! frames and stderr lines as binary frames so attached consoles can tell
//! the streams apart.

use crate::instance::{ConsoleLine, ConsoleTap, InstanceManager};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info, warn};
use shared::{InstanceId, LifecycleResponse};
use std::sync::Arc;
use tokio::sync::broadcast;

pub fn router(manager: Arc<InstanceManager>) -> Router {
    Router::new()
        .route("/server/:id/start", post(start_instance))
        .route("/server/:id/stop", post(stop_instance))
        .route("/server/:id/restart", post(restart_instance))
        .route("/server/:id", get(console_ws))
        .with_state(manager)
}

/// Binds `addr` and serves the router on a background task, returning the
/// bound address. Used by the binary and by integration tests (which bind
/// port 0).
pub async fn serve(
    manager: Arc<InstanceManager>,
    addr: &str,
) -> std::io::Result<std::net::SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("Host listening on {}", local_addr);

    let app = router(manager);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("Host server failed: {}", e);
        }
    });
    Ok(local_addr)
}

fn lifecycle_response(result: Result<(), String>) -> (StatusCode, Json<LifecycleResponse>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(LifecycleResponse::ok())),
        Err(message) => (StatusCode::CONFLICT, Json(LifecycleResponse::err(message))),
    }
}

fn parse_id(id: &str) -> Result<InstanceId, (StatusCode, Json<LifecycleResponse>)> {
    id.parse::<InstanceId>().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(LifecycleResponse::err(e.to_string())),
        )
    })
}

async fn start_instance(
    State(manager): State<Arc<InstanceManager>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<LifecycleResponse>) {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    debug!("Lifecycle request: start {}", id);
    lifecycle_response(manager.start(&id).await)
}

async fn stop_instance(
    State(manager): State<Arc<InstanceManager>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<LifecycleResponse>) {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    debug!("Lifecycle request: stop {}", id);
    lifecycle_response(manager.stop(&id).await)
}

async fn restart_instance(
    State(manager): State<Arc<InstanceManager>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<LifecycleResponse>) {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    debug!("Lifecycle request: restart {}", id);
    lifecycle_response(manager.restart(&id).await)
}

async fn console_ws(
    State(manager): State<Arc<InstanceManager>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let id = match id.parse::<InstanceId>() {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match manager.attach(&id).await {
        Ok(tap) => ws.on_upgrade(move |socket| serve_console(socket, tap, id)),
        Err(message) => (StatusCode::NOT_FOUND, message).into_response(),
    }
}

/// Bridges one attached console: broadcast lines out, typed commands in,
/// until the socket or the instance goes away.
async fn serve_console(mut socket: WebSocket, mut tap: ConsoleTap, id: InstanceId) {
    info!("Console attached to {}", id);
    let stdin = tap.stdin.clone();

    loop {
        tokio::select! {
            line = tap.output.recv() => {
                let message = match line {
                    Ok(ConsoleLine::Out(text)) => Message::Text(text),
                    Ok(ConsoleLine::Err(text)) => Message::Binary(text.into_bytes()),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Console for {} lagged, dropped {} lines", id, missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            // Resolves immediately if the instance died before the attach.
            _ = async { tap.exited.wait_for(|done| *done).await.map(|_| ()) } => break,
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        // Dropped silently once the instance is gone; the
                        // exit notification closes the socket right after.
                        let _ = stdin.send(text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Console socket for {} errored: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    info!("Console detached from {}", id);
}
