//! Shared helpers for integration tests.
//!
//! - `logger`: structured per-test logging with phase tracking

pub mod logger;
