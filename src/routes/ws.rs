//! WebSocket handler: engine event stream plus request frames.
//!
//! DESIGN
//! ======
//! On upgrade the connection subscribes to the shared frame broadcast and
//! enters a `select!` loop:
//! - Incoming client frames -> parse, dispatch by syscall prefix, reply
//! - Broadcast engine frames -> forward to client
//!
//! Handlers return the reply data or an error frame. They never broadcast;
//! state changes reach every client through the component event bridge.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade -> send `gateway:connected` with `client_id` and a snapshot
//! 2. Client sends request frames -> dispatch -> `done` or `error` reply
//! 3. Engine events stream as `request` frames with no `parent_id`
//! 4. Close or send failure -> drop the subscription

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::model::CheckInStatus;
use crate::services::broadcast::to_data;
use crate::services::{attendance, session};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let mut events = state.subscribe_frames();

    let welcome = welcome_frame(&state, client_id).await;
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%client_id, "ws: client connected");

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, client_id, text.as_str()).await {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = events.recv() => match event {
                Ok(frame) => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "ws: client lagging; frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!(%client_id, "ws: client disconnected");
}

async fn welcome_frame(state: &AppState, client_id: Uuid) -> Frame {
    let session_id = state.store.read().await.session_id();
    let realtime = json!(state.connectivity().state());
    Frame::request("gateway:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("session_id", json!(session_id))
        .with_data("realtime", realtime)
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(frame) else {
        warn!(syscall = %frame.syscall, "ws: frame serialization failed");
        return Ok(());
    };
    socket.send(Message::Text(text.into())).await
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(state: &AppState, client_id: Uuid, text: &str) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };
    debug!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "attendance" => handle_attendance(state, &req).await,
        "session" => handle_session(state, &req).await,
        "overlay" => handle_overlay(state, &req),
        "realtime" => handle_realtime(state, &req),
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(data) => vec![req.done_with(data)],
        Err(err_frame) => vec![err_frame],
    }
}

fn data_i64(req: &Frame, key: &str) -> Option<i64> {
    req.data.get(key).and_then(serde_json::Value::as_i64)
}

fn data_str<'a>(req: &'a Frame, key: &str) -> Option<&'a str> {
    req.data.get(key).and_then(|v| v.as_str())
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_attendance(state: &AppState, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "scan" => {
            let Some(payload) = data_str(req, "payload").map(str::trim).filter(|p| !p.is_empty()) else {
                return Err(req.error("payload required"));
            };
            Ok(to_data(&attendance::scan(state, payload).await))
        }
        "check_in" => {
            let Some(attendee_id) = data_i64(req, "attendee_id") else {
                return Err(req.error("attendee_id required"));
            };
            let status = match req.data.get("status") {
                None => CheckInStatus::Present,
                Some(v) => match serde_json::from_value(v.clone()) {
                    Ok(status) => status,
                    Err(_) => return Err(req.error("status must be PRESENT or ABSENT")),
                },
            };
            match attendance::mark_manual(state, attendee_id, status).await {
                Ok(record) => Ok(to_data(&record)),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "roster" => {
            let roster = attendance::roster(state).await;
            Ok(Data::from([("attendees".to_owned(), json!(roster))]))
        }
        "counts" => {
            let (session_id, counts) = attendance::counts(state).await.unzip();
            let mut data = to_data(&counts.unwrap_or_default());
            data.insert("session_id".into(), json!(session_id));
            Ok(data)
        }
        op => Err(req.error(format!("unknown attendance op: {op}"))),
    }
}

async fn handle_session(state: &AppState, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "open" => {
            let description = data_str(req, "description").map(str::to_owned);
            match session::open_session(state, description).await {
                Ok(row) => Ok(to_data(&row)),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "close" => {
            let result = match data_i64(req, "session_id").or(req.session_id) {
                Some(id) => session::close_session(state, id).await,
                None => session::close_current(state).await,
            };
            match result {
                Ok(row) => Ok(to_data(&row)),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "list" => {
            let sessions = session::history(state).await;
            Ok(Data::from([("sessions".to_owned(), json!(sessions))]))
        }
        op => Err(req.error(format!("unknown session op: {op}"))),
    }
}

fn handle_overlay(state: &AppState, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "snapshot" => Ok(Data::from([("entries".to_owned(), json!(state.overlay.snapshot()))])),
        op => Err(req.error(format!("unknown overlay op: {op}"))),
    }
}

fn handle_realtime(state: &AppState, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "state" => Ok(to_data(&state.connectivity().state())),
        op => Err(req.error(format!("unknown realtime op: {op}"))),
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
