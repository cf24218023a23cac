//! Bridge between a session task and the HTTP response body.
//!
//! The session writes into a bounded channel; the response body drains it.
//! When hyper drops the body (client gone, connection reset) the session's
//! cancellation handle fires.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::streaming::{CancelHandle, EventSink};

/// Frames buffered between the session and the body.
pub const FRAME_CHANNEL_CAPACITY: usize = 8;

/// Create a connected sink/body pair. Dropping the body cancels `cancel`.
pub fn frame_channel(write_timeout: Duration, cancel: CancelHandle) -> (ChannelSink, FrameStream) {
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
    (
        ChannelSink { tx, write_timeout },
        FrameStream { rx, cancel },
    )
}

/// Sink side, owned by the session task.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    write_timeout: Duration,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), StreamError> {
        match tokio::time::timeout(self.write_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StreamError::ClientDisconnected),
            Err(_) => Err(StreamError::Timeout),
        }
    }
}

/// Body side, handed to `axum::body::Body::from_stream`.
pub struct FrameStream {
    rx: mpsc::Receiver<Bytes>,
    cancel: CancelHandle,
}

impl Stream for FrameStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
