//! Testing utilities for applications built on reqscope.
//!
//! This module provides:
//! - An in-memory route resolver
//! - A session interface that records what it saves
//! - Teardown probes and a ready-made test application

mod fixtures;
mod mocks;
mod routes;

pub use fixtures::{test_app, TEST_SECRET_KEY, TEST_SERVER_NAME};
pub use mocks::{RecordingSessionInterface, TeardownProbe};
pub use routes::StaticRouteMap;
