//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The operator UI talks to the engine two ways: REST endpoints for
//! one-shot reads and commands, and a websocket at `/api/ws` that streams
//! every engine event as a frame and accepts the same commands as request
//! frames. Both surfaces call the same service functions.

pub mod attendance;
pub mod sessions;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::BackendError;
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/attendees", get(attendance::list_attendees))
        .route("/api/attendees/{id}/check-in", post(attendance::check_in))
        .route("/api/counts", get(attendance::counts))
        .route("/api/scan", post(attendance::scan))
        .route("/api/overlay", get(attendance::overlay))
        .route("/api/realtime", get(attendance::realtime_state))
        .route("/api/sessions", get(sessions::list_sessions).post(sessions::open_session))
        .route("/api/sessions/{id}/close", post(sessions::close_session))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub(crate) fn backend_error_to_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::NotFound(_) => StatusCode::NOT_FOUND,
        BackendError::Rejected(_) => StatusCode::CONFLICT,
        BackendError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
        BackendError::Database(_) | BackendError::InvalidPayload(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
