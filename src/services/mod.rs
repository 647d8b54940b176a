//! Async orchestration over the synchronous engine components.
//!
//! ARCHITECTURE
//! ============
//! Service functions own every I/O suspension point: backend reads and
//! writes, the realtime feed, frame acquisition. They lock a component,
//! decide, release the lock, perform the I/O, then lock again to apply the
//! result. Route handlers and background tasks only ever call into here.

pub mod attendance;
pub mod broadcast;
pub mod realtime;
pub mod scanner;
pub mod session;
