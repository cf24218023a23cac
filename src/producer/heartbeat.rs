//! Fixed-interval heartbeat producer.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::traits::{unix_millis, Pacer, Producer};
use crate::error::ProducerError;
use crate::streaming::{Event, EVENT_COMPLETE, EVENT_MESSAGE};

/// Emits a fixed message every `interval`, indefinitely unless a limit is set.
pub struct Heartbeat {
    pacer: Pacer,
    message: String,
    limit: Option<u64>,
    sequence: u64,
    finished: bool,
}

#[derive(Serialize)]
struct Beat<'a> {
    message: &'a str,
    sequence: u64,
    /// Emission time, Unix epoch milliseconds.
    timestamp: u64,
}

impl Heartbeat {
    pub fn new(interval: Duration, message: impl Into<String>) -> Self {
        Self {
            pacer: Pacer::new(interval),
            message: message.into(),
            limit: None,
            sequence: 0,
            finished: false,
        }
    }

    /// Stop after `limit` beats with a terminal `complete` event.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
impl Producer for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn next(&mut self) -> Option<Result<Event, ProducerError>> {
        if self.finished {
            return None;
        }

        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            self.finished = true;
            let payload = serde_json::json!({ "message": "Stream completed" });
            let event = Event::json(EVENT_COMPLETE, &payload)
                .map(|event| event.with_id((self.sequence + 1).to_string()))
                .map_err(ProducerError::from);
            return Some(event);
        }

        self.pacer.wait().await;

        let sequence = self.sequence + 1;
        let beat = Beat {
            message: &self.message,
            sequence,
            timestamp: unix_millis(),
        };
        let event = match Event::json(EVENT_MESSAGE, &beat) {
            Ok(event) => event.with_id(sequence.to_string()),
            Err(e) => return Some(Err(e.into())),
        };

        self.sequence = sequence;
        self.pacer.emitted();
        Some(Ok(event))
    }
}
