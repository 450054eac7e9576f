//! IPO-PULSE: multi-source IPO offering tracker.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod health;
pub mod quota;
pub mod sources;
pub mod storage;
pub mod types;
