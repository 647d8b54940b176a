//! Roll-call attendance engine.
//!
//! ARCHITECTURE
//! ============
//! A local projection of the attendance tables (`store`) reconciles three
//! write channels into one latest-wins view: the initial bulk load, the
//! realtime change feed, and this process's own writes. Sessions, scans and
//! manual check-ins all funnel through that projection; the HTTP and
//! websocket routes are thin shells over `services`.

pub mod attendee;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod events;
pub mod frame;
pub mod identity;
pub mod model;
pub mod routes;
pub mod scan;
pub mod services;
pub mod sessions;
pub mod state;
pub mod store;
