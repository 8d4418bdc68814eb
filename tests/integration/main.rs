//! Integration test binary -- all integration tests consolidated into a single
//! binary to keep link times down.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod background_restore;
mod dispatcher_fallback;
mod host_bridge;
mod scheduler_lifecycle;
