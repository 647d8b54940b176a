//! Event-to-frame bridge.
//!
//! Each component publishes typed events on its own bus. `bridge` renders
//! them as request-status frames and fans them out on the shared broadcast
//! channel that websocket connections subscribe to. Sending with no
//! connected clients is not an error.

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::connectivity::ConnectivityEvent;
use crate::events::EventBus;
use crate::frame::{Data, Frame};
use crate::identity;
use crate::model::Attendee;
use crate::scan::overlay::OverlayEvent;
use crate::sessions::SessionEvent;
use crate::store::StoreEvent;

/// Subscribe to every component bus and forward rendered frames to `tx`.
pub fn bridge(
    tx: &broadcast::Sender<Frame>,
    store: &EventBus<StoreEvent>,
    sessions: &EventBus<SessionEvent>,
    overlay: &EventBus<OverlayEvent>,
    connectivity: &EventBus<ConnectivityEvent>,
) {
    forward(tx, store, store_frame);
    forward(tx, sessions, session_frame);
    forward(tx, overlay, overlay_frame);
    forward(tx, connectivity, connectivity_frame);
}

fn forward<E: 'static>(tx: &broadcast::Sender<Frame>, bus: &EventBus<E>, render: fn(&E) -> Frame) {
    let tx = tx.clone();
    bus.subscribe(move |event| {
        let _ = tx.send(render(event));
    });
}

// =============================================================================
// RENDERING
// =============================================================================

/// Flatten any serializable value into frame data.
pub(crate) fn to_data(value: &impl Serialize) -> Data {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        Ok(other) => Data::from([("value".to_owned(), other)]),
        Err(_) => Data::new(),
    }
}

/// Attendee row plus the payload its code encodes.
pub(crate) fn attendee_data(attendee: &Attendee) -> Data {
    let mut data = to_data(attendee);
    data.insert("payload".into(), json!(identity::hash(attendee)));
    data
}

#[must_use]
pub fn store_frame(event: &StoreEvent) -> Frame {
    match event {
        StoreEvent::AttendeeAdded(a) => Frame::request("attendance:attendee_added", attendee_data(a)),
        StoreEvent::AttendeeUpdated(a) => Frame::request("attendance:attendee_updated", attendee_data(a)),
        StoreEvent::AttendeeRemoved(a) => Frame::request("attendance:attendee_removed", attendee_data(a)),
        StoreEvent::RecordIngested(r) => {
            Frame::request("attendance:record", to_data(r)).with_session_id(r.session_id)
        }
        StoreEvent::RecordRemoved(r) => {
            Frame::request("attendance:record_removed", to_data(r)).with_session_id(r.session_id)
        }
        StoreEvent::StatusChanged { attendee_id, from, to } => Frame::request("attendance:status", Data::new())
            .with_data("attendee_id", *attendee_id)
            .with_data("from", json!(from))
            .with_data("to", json!(to)),
        StoreEvent::CountsChanged { session_id, counts } => {
            Frame::request("attendance:counts", to_data(counts)).with_session_id(*session_id)
        }
    }
}

#[must_use]
pub fn session_frame(event: &SessionEvent) -> Frame {
    let (syscall, session) = match event {
        SessionEvent::Opened(s) => ("session:opened", s),
        SessionEvent::Closed(s) => ("session:closed", s),
    };
    Frame::request(syscall, to_data(session)).with_session_id(session.id)
}

#[must_use]
pub fn overlay_frame(event: &OverlayEvent) -> Frame {
    match event {
        OverlayEvent::Added(entry) => Frame::request("overlay:added", to_data(entry)),
        OverlayEvent::Updated(entry) => Frame::request("overlay:updated", to_data(entry)),
        OverlayEvent::Removed(payload) => {
            Frame::request("overlay:removed", Data::new()).with_data("payload", payload.as_str())
        }
        OverlayEvent::Cleared => Frame::request("overlay:cleared", Data::new()),
    }
}

#[must_use]
pub fn connectivity_frame(event: &ConnectivityEvent) -> Frame {
    match event {
        ConnectivityEvent::StateChanged(state) => Frame::request("realtime:state", to_data(state)),
        ConnectivityEvent::UpdateReceived => Frame::request("realtime:update", Data::new()),
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
