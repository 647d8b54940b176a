//! Realtime channel liveness.
//!
//! State machine:
//!
//! ```text
//! DISCONNECTED --signal--> CONNECTED(stale) --update--> CONNECTED(live)
//!      ^                        ^                            |
//!      |                        +------ liveness expiry -----+
//!      +------------------- disconnect (any state)
//! ```
//!
//! The monitor is a pure state machine driven with explicit instants; the
//! realtime service owns the timer and sends heartbeats when `poll_at`
//! asks for one.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected { stale: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    StateChanged(ConnectionState),
    UpdateReceived,
}

pub struct ConnectivityMonitor {
    state: ConnectionState,
    liveness: Duration,
    heartbeat_debounce: Duration,
    deadline: Option<Instant>,
    last_heartbeat: Option<Instant>,
    events: EventBus<ConnectivityEvent>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            liveness: config.liveness,
            heartbeat_debounce: config.heartbeat_debounce,
            deadline: None,
            last_heartbeat: None,
            events: EventBus::new(),
        }
    }

    #[must_use]
    pub fn events(&self) -> &EventBus<ConnectivityEvent> {
        &self.events
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// When the liveness window runs out, if armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The channel reports it is subscribed.
    pub fn on_connected_at(&mut self, now: Instant) {
        if self.state == ConnectionState::Disconnected {
            info!("realtime channel connected");
            self.set_state(ConnectionState::Connected { stale: true });
            self.deadline = Some(now + self.liveness);
        }
    }

    /// A change or heartbeat arrived.
    pub fn on_update_at(&mut self, now: Instant) {
        self.set_state(ConnectionState::Connected { stale: false });
        self.deadline = Some(now + self.liveness);
        self.events.publish(&ConnectivityEvent::UpdateReceived);
    }

    pub fn on_disconnected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            warn!("realtime channel disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
        self.deadline = None;
    }

    /// Check the liveness window. Returns true when a heartbeat should be
    /// sent now.
    pub fn poll_at(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }
        if self.state == (ConnectionState::Connected { stale: false }) {
            warn!(liveness_secs = self.liveness.as_secs(), "no realtime update within liveness window");
        }
        self.set_state(ConnectionState::Connected { stale: true });
        self.deadline = Some(now + self.liveness);
        self.request_heartbeat_at(now)
    }

    /// Debounced heartbeat gate: true at most once per debounce window.
    pub fn request_heartbeat_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_heartbeat {
            if now.saturating_duration_since(last) < self.heartbeat_debounce {
                debug!("heartbeat debounced");
                return false;
            }
        }
        self.last_heartbeat = Some(now);
        true
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.events.publish(&ConnectivityEvent::StateChanged(state));
        }
    }
}

#[cfg(test)]
#[path = "connectivity_test.rs"]
mod tests;
