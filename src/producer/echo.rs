//! Request-echo producer.
//!
//! The body is split on Unicode whitespace into words, and consecutive words
//! are grouped `chunk_size` at a time, joined by a single space.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::traits::{Pacer, Producer};
use crate::error::ProducerError;
use crate::streaming::{Event, EVENT_CHUNK, EVENT_COMPLETE};

/// User id reported when the request does not carry one.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Deterministic chunk split used by [`EchoChunker`]. `chunk_size` of zero
/// is clamped to one.
pub fn split_chunks(body: &str, chunk_size: usize) -> Vec<String> {
    let words: Vec<&str> = body.split_whitespace().collect();
    words
        .chunks(chunk_size.max(1))
        .map(|group| group.join(" "))
        .collect()
}

/// Echoes a request body back chunk by chunk.
pub struct EchoChunker {
    chunks: Vec<String>,
    user_id: String,
    pacer: Pacer,
    offset: usize,
    completed: bool,
}

#[derive(Serialize)]
struct EchoChunk<'a> {
    chunk: &'a str,
    index: usize,
    user_id: &'a str,
}

#[derive(Serialize)]
struct EchoComplete {
    complete: bool,
    message: &'static str,
    total_chunks: usize,
}

impl EchoChunker {
    pub fn new(body: &str, chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunks: split_chunks(body, chunk_size),
            user_id: ANONYMOUS_USER.to_string(),
            pacer: Pacer::new(delay),
            offset: 0,
            completed: false,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl Producer for EchoChunker {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn next(&mut self) -> Option<Result<Event, ProducerError>> {
        if self.completed {
            return None;
        }

        if self.offset >= self.chunks.len() {
            self.completed = true;
            let total = self.total_chunks();
            let payload = EchoComplete {
                complete: true,
                message: "Processing completed",
                total_chunks: total,
            };
            let event = Event::json(EVENT_COMPLETE, &payload)
                .map(|event| event.with_id((total + 1).to_string()))
                .map_err(ProducerError::from);
            return Some(event);
        }

        self.pacer.wait().await;

        let index = self.offset;
        let Some(chunk) = self.chunks.get(index) else {
            return Some(Err(ProducerError::Internal(format!(
                "chunk offset {} out of range ({} chunks)",
                index,
                self.chunks.len()
            ))));
        };
        let payload = EchoChunk {
            chunk,
            index,
            user_id: &self.user_id,
        };
        let event = match Event::json(EVENT_CHUNK, &payload) {
            Ok(event) => event.with_id((index + 1).to_string()),
            Err(e) => return Some(Err(e.into())),
        };

        self.offset += 1;
        self.pacer.emitted();
        Some(Ok(event))
    }
}
