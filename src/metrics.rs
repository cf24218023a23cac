//! Prometheus metrics for the streaming engine.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use nix::libc;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::StreamError;

/// Error reason labels for stream write failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// Client disconnected (EPIPE, ECONNRESET, BrokenPipe, ConnectionReset)
    ClientDisconnected,
    /// Timeout (deadline exceeded, ETIMEDOUT)
    Timeout,
    /// Operation was canceled
    Canceled,
    /// Network error (other network-related errors)
    Network,
    /// Other/unknown error
    Other,
}

impl ErrorReason {
    /// Convert to static string for metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::ClientDisconnected => "client_disconnected",
            ErrorReason::Timeout => "timeout",
            ErrorReason::Canceled => "canceled",
            ErrorReason::Network => "network",
            ErrorReason::Other => "other",
        }
    }

    /// Classify an I/O error into an ErrorReason.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                ErrorReason::ClientDisconnected
            }
            io::ErrorKind::TimedOut => ErrorReason::Timeout,
            io::ErrorKind::Interrupted => ErrorReason::Canceled,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable => ErrorReason::Network,
            _ => match err.raw_os_error() {
                Some(libc::EPIPE) | Some(libc::ECONNRESET) => ErrorReason::ClientDisconnected,
                Some(libc::ETIMEDOUT) => ErrorReason::Timeout,
                Some(libc::ECANCELED) => ErrorReason::Canceled,
                _ => ErrorReason::Other,
            },
        }
    }

    /// Classify a sink error.
    pub fn from_stream_error(err: &StreamError) -> Self {
        match err {
            StreamError::Write(e) => Self::from_io_error(e),
            StreamError::ClientDisconnected => ErrorReason::ClientDisconnected,
            StreamError::Timeout => ErrorReason::Timeout,
        }
    }
}

/// Active sessions tracker, used for the peak gauge.
static ACTIVE_STREAMS: AtomicI64 = AtomicI64::new(0);
static PEAK_STREAMS: AtomicI64 = AtomicI64::new(0);

/// Initialize metrics descriptions.
pub fn init_metrics() {
    // Session metrics
    describe_gauge!("sse_active_sessions", "Number of registered stream sessions");
    describe_counter!("sse_sessions_total", "Total stream sessions opened");
    describe_counter!(
        "sse_sessions_rejected_total",
        "Stream requests rejected due to capacity or shutdown"
    );
    describe_counter!(
        "sse_session_outcomes_total",
        "Closed sessions by outcome (completed, cancelled, sink_failed, producer_failed)"
    );
    describe_histogram!(
        "sse_session_duration_seconds",
        "Time from first pull to close"
    );

    // Streaming metrics
    describe_gauge!("sse_active_streams", "Number of sessions currently running");
    describe_gauge!("sse_peak_streams", "Peak number of concurrently running sessions");
    describe_counter!("sse_frames_sent_total", "Event frames written to clients");
    describe_counter!("sse_keepalives_sent_total", "Keepalive comment frames written");
    describe_counter!("sse_bytes_sent_total", "Total bytes written to clients");
    describe_counter!("sse_stream_errors_total", "Sink write errors");
    describe_counter!("sse_producer_errors_total", "Fatal producer or encoding errors");
}

/// Start the Prometheus metrics HTTP server.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // Session duration: 10ms to ~163s (exponential buckets base 0.01, factor 2, count 15)
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("sse_session_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

pub fn record_session_opened() {
    counter!("sse_sessions_total").increment(1);
}

pub fn record_session_rejected() {
    counter!("sse_sessions_rejected_total").increment(1);
}

/// Update registered sessions gauge.
pub fn set_active_sessions(count: u64) {
    gauge!("sse_active_sessions").set(count as f64);
}

pub fn record_bytes_sent(bytes: u64) {
    counter!("sse_bytes_sent_total").increment(bytes);
}

pub fn record_frame_sent() {
    counter!("sse_frames_sent_total").increment(1);
}

pub fn record_keepalive_sent() {
    counter!("sse_keepalives_sent_total").increment(1);
}

/// Record stream error with reason label.
pub fn record_stream_error(reason: ErrorReason) {
    counter!("sse_stream_errors_total", "reason" => reason.as_str()).increment(1);
}

pub fn record_producer_error(producer: &'static str) {
    counter!("sse_producer_errors_total", "producer" => producer).increment(1);
}

/// Record stream start - increments running sessions and updates peak if necessary.
pub fn record_stream_start() {
    let current = ACTIVE_STREAMS.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!("sse_active_streams").set(current as f64);

    loop {
        let peak = PEAK_STREAMS.load(Ordering::Relaxed);
        if current <= peak {
            break;
        }
        if PEAK_STREAMS
            .compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            gauge!("sse_peak_streams").set(current as f64);
            break;
        }
    }
}

/// Record stream end with its outcome label.
pub fn record_stream_end(outcome: &'static str, duration: Duration) {
    let current = ACTIVE_STREAMS.fetch_sub(1, Ordering::Relaxed) - 1;
    gauge!("sse_active_streams").set(current as f64);
    counter!("sse_session_outcomes_total", "outcome" => outcome).increment(1);
    histogram!("sse_session_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors() {
        let broken = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(ErrorReason::from_io_error(&broken), ErrorReason::ClientDisconnected);

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(ErrorReason::from_io_error(&timed_out), ErrorReason::Timeout);

        let errno = io::Error::from_raw_os_error(libc::ECANCELED);
        assert_eq!(ErrorReason::from_io_error(&errno), ErrorReason::Canceled);
    }

    #[test]
    fn test_classify_stream_errors() {
        assert_eq!(
            ErrorReason::from_stream_error(&StreamError::ClientDisconnected).as_str(),
            "client_disconnected"
        );
        assert_eq!(
            ErrorReason::from_stream_error(&StreamError::Timeout).as_str(),
            "timeout"
        );
    }
}
