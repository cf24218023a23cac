//! Frame sinks.
//!
//! A sink accepts already-encoded frames. The session flushes after every
//! frame so intermediaries see bytes as soon as they are produced.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::StreamError;

/// Destination for encoded SSE frames.
#[async_trait]
pub trait EventSink: Send {
    /// Write one complete frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), StreamError>;

    /// Push any buffered bytes to the transport.
    async fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

/// Unbuffered SSE writer over any async byte stream, with per-write timeout.
pub struct SseWriter<W> {
    stream: W,
    write_timeout: Duration,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> SseWriter<W> {
    /// Create a new SSE writer.
    pub fn new(stream: W, write_timeout: Duration) -> Self {
        Self {
            stream,
            write_timeout,
            bytes_written: 0,
        }
    }

    /// Get total bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Shutdown the writer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        // Bounded so a stalled peer cannot hold the task open
        tokio::time::timeout(self.write_timeout, self.stream.shutdown())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Shutdown timeout"))?
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for SseWriter<W> {
    async fn send(&mut self, frame: Bytes) -> Result<(), StreamError> {
        tokio::time::timeout(self.write_timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| StreamError::Timeout)??;

        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StreamError> {
        tokio::time::timeout(self.write_timeout, self.stream.flush())
            .await
            .map_err(|_| StreamError::Timeout)??;
        Ok(())
    }
}
