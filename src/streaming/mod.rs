//! SSE framing, sinks and the per-connection stream session.

mod cancel;
mod decoder;
mod session;
mod sse;
mod writer;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use decoder::SseDecoder;
pub use session::{SessionOutcome, SessionReport, SessionState, StreamSession};
pub use sse::{
    encode, error_event, keepalive, Event, EVENT_CHUNK, EVENT_COMPLETE, EVENT_ERROR,
    EVENT_MESSAGE, EVENT_PROGRESS, KEEPALIVE_FRAME, SSE_HEADERS,
};
pub use writer::{EventSink, SseWriter};
