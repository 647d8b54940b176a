//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is constructed once in `main` and injected everywhere else:
//! Axum handlers get it through the `State` extractor, background tasks get
//! a clone. It owns one instance of each engine component plus the backend
//! handle. Nothing is a global.
//!
//! Components shared between handlers and background tasks (store, session
//! registry) sit behind Tokio `RwLock`s and are locked between backend
//! calls, never across one. The connectivity monitor and overlay are synchronous
//! and use std mutexes internally.
//!
//! Every component event is also rendered as a `Frame` and broadcast on
//! `frames` for websocket clients.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{RwLock, broadcast};

use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::db::Backend;
use crate::frame::Frame;
use crate::scan::overlay::Overlay;
use crate::services;
use crate::sessions::SessionRegistry;
use crate::store::AttendanceStore;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; every field is Arc-wrapped or a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn Backend>,
    pub store: Arc<RwLock<AttendanceStore>>,
    pub sessions: Arc<RwLock<SessionRegistry>>,
    pub connectivity: Arc<Mutex<ConnectivityMonitor>>,
    pub overlay: Overlay,
    pub frames: broadcast::Sender<Frame>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let store = AttendanceStore::new(config.scan_dedup);
        let sessions = SessionRegistry::new();
        let connectivity = ConnectivityMonitor::new(config.realtime);
        let overlay = Overlay::new(config.overlay);
        let (frames, _) = broadcast::channel(config.event_channel_capacity);

        services::broadcast::bridge(&frames, store.events(), sessions.events(), overlay.events(), connectivity.events());

        Self {
            config: Arc::new(config),
            backend,
            store: Arc::new(RwLock::new(store)),
            sessions: Arc::new(RwLock::new(sessions)),
            connectivity: Arc::new(Mutex::new(connectivity)),
            overlay,
            frames,
        }
    }

    /// Identity stamped into `created_by` / `closed_by`: the configured
    /// operator, else whoever the backend is authenticated as.
    #[must_use]
    pub fn operator_id(&self) -> Option<String> {
        self.config.operator_id.clone().or_else(|| self.backend.current_user_id())
    }

    pub fn connectivity(&self) -> MutexGuard<'_, ConnectivityMonitor> {
        self.connectivity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
