//! Incremental SSE decoder.
//!
//! The server never reads event streams; this exists for clients written
//! against the engine and for tests that check what a browser would see.
//! Lines starting with `:` are comments and are dropped, so keepalive frames
//! never surface as events.

use super::sse::Event;

/// Incremental decoder over arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    event_type: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a complete byte stream.
    pub fn decode_all(bytes: &[u8]) -> Vec<Event> {
        Self::new().feed(bytes)
    }

    /// Whether a partial frame is still buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
            || self.id.is_some()
            || self.event_type.is_some()
            || self.data.is_some()
    }

    fn process_line(&mut self, line: &str) -> Option<Event> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Event> {
        let id = self.id.take();
        let event_type = self.event_type.take();
        let data = self.data.take()?;
        Some(Event {
            id,
            event_type,
            data,
        })
    }
}
