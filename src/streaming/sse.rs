//! SSE (Server-Sent Events) event model and frame encoding.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::EncodeError;

/// Event type for heartbeats and other untyped messages.
pub const EVENT_MESSAGE: &str = "message";
/// A content fragment (token or echo chunk).
pub const EVENT_CHUNK: &str = "chunk";
/// Terminal event of a finite producer.
pub const EVENT_COMPLETE: &str = "complete";
/// A percentage update.
pub const EVENT_PROGRESS: &str = "progress";
/// Fatal session error.
pub const EVENT_ERROR: &str = "error";

/// Comment frame sent to keep idle connections open through proxies.
pub const KEEPALIVE_FRAME: &[u8] = b": keepalive\n\n";

/// HTTP headers for SSE responses.
pub const SSE_HEADERS: [(&str, &str); 3] = [
    ("content-type", "text/event-stream"),
    ("cache-control", "no-cache"),
    ("x-accel-buffering", "no"),
];

/// A logical event, before wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    /// Event id, monotonically increasing within a session when present.
    pub id: Option<String>,
    /// Event type; `None` means the default `message` type.
    pub event_type: Option<String>,
    /// Text payload, usually a JSON object.
    pub data: String,
}

impl Event {
    /// Create an untyped event with the given payload.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event_type: None,
            data: data.into(),
        }
    }

    /// Create a typed event whose payload is `payload` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(
        event_type: &str,
        payload: &T,
    ) -> Result<Self, EncodeError> {
        Ok(Self::new(serde_json::to_string(payload)?).with_type(event_type))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// The effective event type as a browser `EventSource` would see it.
    pub fn kind(&self) -> &str {
        self.event_type.as_deref().unwrap_or(EVENT_MESSAGE)
    }

    /// Parse the payload as JSON.
    pub fn json_data(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.data)
    }
}

/// Encode an event as one SSE frame.
///
/// Header lines come in a fixed order: `id`, `event`, then one `data` line
/// per payload line. The frame ends with a blank line.
pub fn encode(event: &Event) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(event.data.len() + 32);

    if let Some(id) = &event.id {
        reject_line_breaks(id, "id")?;
        put_field(&mut buf, "id", id);
    }
    if let Some(event_type) = &event.event_type {
        reject_line_breaks(event_type, "event")?;
        put_field(&mut buf, "event", event_type);
    }
    for line in payload_lines(&event.data) {
        put_field(&mut buf, "data", line);
    }
    buf.put_u8(b'\n');

    Ok(buf.freeze())
}

/// The keepalive comment frame.
pub fn keepalive() -> Bytes {
    Bytes::from_static(KEEPALIVE_FRAME)
}

/// Format an error as a terminal `error` event.
pub fn error_event(message: &str) -> Event {
    Event::new(serde_json::json!({ "error": message }).to_string()).with_type(EVENT_ERROR)
}

fn put_field(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_u8(b':');
    if !value.is_empty() {
        buf.put_u8(b' ');
        buf.put_slice(value.as_bytes());
    }
    buf.put_u8(b'\n');
}

fn reject_line_breaks(value: &str, field: &'static str) -> Result<(), EncodeError> {
    if value.contains(['\n', '\r']) {
        return Err(EncodeError::LineBreak { field });
    }
    Ok(())
}

/// Split a payload on `\r\n`, `\r` and `\n`. Always yields at least one line.
fn payload_lines(data: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(['\r', '\n']) {
            Some(pos) => {
                let skip = if current[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[pos + skip..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}
