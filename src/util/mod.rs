//! Utility functions.

pub mod format;
pub mod time;

pub use format::format_bytes;
pub use time::{format_expiry, format_relative_time};
