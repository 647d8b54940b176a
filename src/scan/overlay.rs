//! Live scan overlay: one positioned, classified entry per visible code.
//!
//! DESIGN
//! ======
//! `OverlayTracker` is the pure core: it turns a detection into a
//! placement (centroid, capped size, rotation), diffs it field by field
//! against the stored entry, and expires entries with `sweep_at`. It never
//! reads a clock.
//!
//! `Overlay` is the shared handle used by the scanner pipeline. It owns the
//! periodic sweep task: the task is spawned when the first entry appears and
//! ends itself once a sweep leaves the tracker empty, so no timer runs while
//! there is nothing to expire. `SweepGuard` aborts the task if the overlay
//! is disposed or dropped first.
//!
//! Positions are fractions of the scan region so the UI can draw the
//! overlay at any resolution.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{Detection, Point, Region};
use crate::config::OverlayConfig;
use crate::events::EventBus;
use crate::store::ScanState;

// =============================================================================
// TYPES
// =============================================================================

/// Icon and color for a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Icon {
    pub name: &'static str,
    pub color: &'static str,
}

#[must_use]
pub fn icon_for(state: ScanState) -> Icon {
    match state {
        ScanState::Unknown => Icon { name: "scan", color: "#9E9E9E" },
        ScanState::Processing => Icon { name: "hourglass", color: "#FFC107" },
        ScanState::Present => Icon { name: "check", color: "#4CAF50" },
        ScanState::Error => Icon { name: "cross", color: "#F44336" },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    /// Degrees, counter-clockwise from the frame's x axis.
    pub rotation: f64,
}

/// Compute where and how large to draw a detected code.
#[must_use]
pub fn placement(corners: &[Point; 4], region: Region, max_size: f64) -> Placement {
    let (min_x, max_x, min_y, max_y) = corners.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(lx, hx, ly, hy), p| (lx.min(p.x), hx.max(p.x), ly.min(p.y), hy.max(p.y)),
    );
    let cx = corners.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = corners.iter().map(|p| p.y).sum::<f64>() / 4.0;

    let span = region.width.min(region.height);
    let size = if span > 0.0 { ((max_x - min_x).max(max_y - min_y) / span).min(max_size) } else { max_size };
    let rotation = (corners[1].y - corners[0].y).atan2(corners[1].x - corners[0].x).to_degrees();

    Placement {
        x: if region.width > 0.0 { cx / region.width } else { 0.0 },
        y: if region.height > 0.0 { cy / region.height } else { 0.0 },
        size,
        rotation,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayEntry {
    pub payload: String,
    #[serde(flatten)]
    pub placement: Placement,
    pub state: ScanState,
    pub icon: Icon,
    #[serde(skip)]
    pub refreshed_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    Added(OverlayEntry),
    Updated(OverlayEntry),
    Removed(String),
    Cleared,
}

/// What `observe_at` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Added,
    Updated,
    Unchanged,
}

// =============================================================================
// TRACKER
// =============================================================================

pub struct OverlayTracker {
    entries: BTreeMap<String, OverlayEntry>,
    config: OverlayConfig,
    events: EventBus<OverlayEvent>,
}

impl Default for OverlayTracker {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl OverlayTracker {
    #[must_use]
    pub fn new(config: OverlayConfig) -> Self {
        Self { entries: BTreeMap::new(), config, events: EventBus::new() }
    }

    #[must_use]
    pub fn events(&self) -> &EventBus<OverlayEvent> {
        &self.events
    }

    #[must_use]
    pub fn get(&self, payload: &str) -> Option<&OverlayEntry> {
        self.entries.get(payload)
    }

    #[must_use]
    pub fn entries(&self) -> Vec<OverlayEntry> {
        self.entries.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold one detection into the overlay. The refresh timestamp always
    /// moves; an `Updated` event fires only if a visible field changed.
    pub fn observe_at(&mut self, detection: &Detection, region: Region, state: ScanState, now: Instant) -> Observed {
        let placement = placement(&detection.corners, region, self.config.max_size);

        if !self.entries.contains_key(&detection.payload) {
            let entry = OverlayEntry {
                payload: detection.payload.clone(),
                placement,
                state,
                icon: icon_for(state),
                refreshed_at: now,
            };
            self.entries.insert(entry.payload.clone(), entry.clone());
            self.events.publish(&OverlayEvent::Added(entry));
            return Observed::Added;
        }
        let Some(entry) = self.entries.get_mut(&detection.payload) else {
            return Observed::Unchanged;
        };

        entry.refreshed_at = now;
        if entry.placement == placement && entry.state == state {
            return Observed::Unchanged;
        }
        entry.placement = placement;
        entry.state = state;
        entry.icon = icon_for(state);
        let entry = entry.clone();
        self.events.publish(&OverlayEvent::Updated(entry));
        Observed::Updated
    }

    /// Change the classification of a tracked payload. Does not refresh it.
    pub fn reclassify(&mut self, payload: &str, state: ScanState) -> bool {
        let Some(entry) = self.entries.get_mut(payload) else {
            return false;
        };
        if entry.state == state {
            return false;
        }
        entry.state = state;
        entry.icon = icon_for(state);
        let entry = entry.clone();
        self.events.publish(&OverlayEvent::Updated(entry));
        true
    }

    /// Remove entries not refreshed within the staleness threshold.
    pub fn sweep_at(&mut self, now: Instant) -> Vec<String> {
        let stale_after = self.config.stale_after;
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.refreshed_at) > stale_after)
            .map(|e| e.payload.clone())
            .collect();
        for payload in &expired {
            self.entries.remove(payload);
            debug!(%payload, "overlay entry expired");
            self.events.publish(&OverlayEvent::Removed(payload.clone()));
        }
        expired
    }

    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        self.events.publish(&OverlayEvent::Cleared);
    }
}

// =============================================================================
// SHARED HANDLE
// =============================================================================

/// Aborts the sweep task on drop unless disarmed.
struct SweepGuard {
    task: Option<JoinHandle<()>>,
}

impl SweepGuard {
    fn disarm(mut self) {
        self.task.take();
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Inner {
    tracker: OverlayTracker,
    sweeper: Option<SweepGuard>,
}

#[derive(Clone)]
pub struct Overlay {
    inner: Arc<Mutex<Inner>>,
    events: EventBus<OverlayEvent>,
}

impl Default for Overlay {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl Overlay {
    #[must_use]
    pub fn new(config: OverlayConfig) -> Self {
        let tracker = OverlayTracker::new(config);
        let events = tracker.events().clone();
        Self { inner: Arc::new(Mutex::new(Inner { tracker, sweeper: None })), events }
    }

    #[must_use]
    pub fn events(&self) -> &EventBus<OverlayEvent> {
        &self.events
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold a detection in and make sure the sweep is running. Must be
    /// called from within a Tokio runtime.
    pub fn observe(&self, detection: &Detection, region: Region, state: ScanState) -> Observed {
        let mut inner = self.lock();
        let observed = inner.tracker.observe_at(detection, region, state, Instant::now());
        if inner.sweeper.is_none() && !inner.tracker.is_empty() {
            let every = inner.tracker.config.sweep_every;
            let task = tokio::spawn(sweep_loop(Arc::downgrade(&self.inner), every));
            inner.sweeper = Some(SweepGuard { task: Some(task) });
            debug!("overlay sweep started");
        }
        observed
    }

    pub fn reclassify(&self, payload: &str, state: ScanState) -> bool {
        self.lock().tracker.reclassify(payload, state)
    }

    #[must_use]
    pub fn get(&self, payload: &str) -> Option<OverlayEntry> {
        self.lock().tracker.get(payload).cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<OverlayEntry> {
        self.lock().tracker.entries()
    }

    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.lock().sweeper.is_some()
    }

    /// Drop every entry and stop the sweep.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        inner.sweeper = None;
        inner.tracker.clear();
    }
}

async fn sweep_loop(inner: Weak<Mutex<Inner>>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = inner.upgrade() else {
            return;
        };
        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        guard.tracker.sweep_at(Instant::now());
        if guard.tracker.is_empty() {
            if let Some(sweeper) = guard.sweeper.take() {
                sweeper.disarm();
            }
            debug!("overlay empty; sweep stopped");
            return;
        }
    }
}

#[cfg(test)]
#[path = "overlay_test.rs"]
mod tests;
