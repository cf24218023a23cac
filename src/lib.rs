//! Server-Sent Events streaming engine.
//!
//! Producers generate logical events, a stream session encodes and writes
//! them to one client with cancellation and keepalives, and an axum front end
//! maps HTTP routes onto sessions.

pub mod config;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod registry;
pub mod server;
pub mod streaming;

pub use config::Config;
pub use error::{DaemonError, Result};
