//! Error types for the streaming engine and its HTTP front end.

use std::io;
use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Top-level error type for the service process.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Shutdown in progress")]
    Shutdown,

    #[error("Session limit reached")]
    SessionLimit,
}

/// A producer could not compute its next event.
///
/// Fatal to the session: surfaced as one terminal `error` frame.
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Producer internal error: {0}")]
    Internal(String),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),
}

/// An event cannot be represented in the text framing.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Line break in {field} field")]
    LineBreak { field: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors while writing frames to the client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Write error: {0}")]
    Write(#[from] io::Error),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Write timeout")]
    Timeout,
}
