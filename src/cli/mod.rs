//! CLI argument parsing and command dispatch.

pub mod args;
pub mod cache;
pub mod config;
pub mod get;

pub use args::{CacheCommand, Cli, Commands, GetArgs, OutputFormat};
