//! Common types and utilities shared across all crates

pub mod config;
pub mod telemetry;
pub mod types;

pub use config::*;
pub use telemetry::*;
pub use types::*;
