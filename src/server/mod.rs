//! HTTP front end: axum routes and the session-to-body bridge.

mod body;
mod routes;

pub use body::{frame_channel, ChannelSink, FrameStream, FRAME_CHANNEL_CAPACITY};
pub use routes::{rejected, router, serve, AppState, EchoRequest};
