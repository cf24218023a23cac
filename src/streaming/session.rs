//! Stream session: one producer driven into one sink until it ends.
//!
//! Each iteration checks cancellation, pulls the next event, encodes it and
//! writes it, flushing after every frame. While a pull is pending the session
//! also wakes on cancellation and on the keepalive deadline.

use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use super::cancel::CancelSignal;
use super::sse::{encode, error_event, keepalive, Event};
use super::writer::EventSink;
use crate::error::{ProducerError, StreamError};
use crate::metrics::{self, ErrorReason};
use crate::producer::Producer;
use crate::registry::SessionGuard;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Completing,
    Cancelling,
    Failing,
    Closed,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The producer was exhausted.
    Completed,
    /// Cancelled by the transport, an explicit handle, or shutdown.
    Cancelled,
    /// A write to the sink failed; nothing more was sent.
    SinkFailed,
    /// The producer or encoder failed; an `error` frame was attempted.
    ProducerFailed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::SinkFailed => "sink_failed",
            SessionOutcome::ProducerFailed => "producer_failed",
        }
    }
}

/// Summary of a closed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: u64,
    pub producer: &'static str,
    pub outcome: SessionOutcome,
    /// Event frames written, including a terminal `error` frame.
    pub frames: u64,
    pub keepalives: u64,
    /// Bytes accepted by the sink, keepalives included.
    pub bytes: u64,
    pub duration: Duration,
}

enum Step {
    Cancelled,
    Keepalive,
    Pulled(Option<Result<Event, ProducerError>>),
}

/// One producer bound to one sink and one cancellation signal.
pub struct StreamSession<S> {
    id: u64,
    producer_name: &'static str,
    producer: Option<Box<dyn Producer>>,
    sink: S,
    signal: CancelSignal,
    keepalive: Option<Duration>,
    guard: Option<SessionGuard>,
    state: SessionState,
    started: Option<Instant>,
    frames: u64,
    keepalives: u64,
    bytes: u64,
    report: Option<SessionReport>,
}

impl<S: EventSink> StreamSession<S> {
    pub fn new(id: u64, producer: Box<dyn Producer>, sink: S, signal: CancelSignal) -> Self {
        Self {
            id,
            producer_name: producer.name(),
            producer: Some(producer),
            sink,
            signal,
            keepalive: None,
            guard: None,
            state: SessionState::Idle,
            started: None,
            frames: 0,
            keepalives: 0,
            bytes: 0,
            report: None,
        }
    }

    /// Send a keepalive comment after this much idle time. `None` disables.
    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive = interval.filter(|d| !d.is_zero());
        self
    }

    /// Hold a registry guard until the session closes.
    pub fn with_guard(mut self, guard: SessionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to `Closed` and return its report.
    ///
    /// Returns the stored report if the session is already closed.
    pub async fn run(&mut self) -> SessionReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let span = tracing::info_span!("session", id = self.id, producer = self.producer_name);
        async {
            self.started = Some(Instant::now());
            metrics::record_stream_start();
            self.transition(SessionState::Active);

            let outcome = self.stream().await;
            self.finish(outcome)
        }
        .instrument(span)
        .await
    }

    /// Close without running further. Idempotent.
    pub fn close(&mut self) -> SessionReport {
        match &self.report {
            Some(report) => report.clone(),
            None => self.finish(SessionOutcome::Cancelled),
        }
    }

    async fn stream(&mut self) -> SessionOutcome {
        // Owned locally so the select below can borrow it beside the signal
        let Some(mut producer) = self.producer.take() else {
            self.transition(SessionState::Cancelling);
            return SessionOutcome::Cancelled;
        };
        let mut last_write = Instant::now();

        loop {
            if self.signal.is_cancelled() {
                self.transition(SessionState::Cancelling);
                return SessionOutcome::Cancelled;
            }

            let keepalive_at = self.keepalive.map(|interval| last_write + interval);
            let step = tokio::select! {
                biased;
                _ = self.signal.cancelled() => Step::Cancelled,
                item = producer.next() => Step::Pulled(item),
                _ = sleep_until_opt(keepalive_at) => Step::Keepalive,
            };

            match step {
                Step::Cancelled => {
                    self.transition(SessionState::Cancelling);
                    return SessionOutcome::Cancelled;
                }
                Step::Keepalive => {
                    if let Err(e) = self.write(keepalive()).await {
                        return self.sink_failed(e);
                    }
                    self.keepalives += 1;
                    metrics::record_keepalive_sent();
                    last_write = Instant::now();
                }
                Step::Pulled(None) => {
                    self.transition(SessionState::Completing);
                    return SessionOutcome::Completed;
                }
                Step::Pulled(Some(Ok(event))) => {
                    let frame = match encode(&event) {
                        Ok(frame) => frame,
                        Err(e) => return self.producer_failed(e.into()).await,
                    };
                    if let Err(e) = self.write(frame).await {
                        return self.sink_failed(e);
                    }
                    self.frames += 1;
                    metrics::record_frame_sent();
                    last_write = Instant::now();
                }
                Step::Pulled(Some(Err(e))) => return self.producer_failed(e).await,
            }
        }
    }

    async fn write(&mut self, frame: Bytes) -> Result<(), StreamError> {
        let len = frame.len() as u64;
        self.sink.send(frame).await?;
        self.sink.flush().await?;
        self.bytes += len;
        metrics::record_bytes_sent(len);
        Ok(())
    }

    fn sink_failed(&mut self, err: StreamError) -> SessionOutcome {
        self.transition(SessionState::Failing);
        let reason = ErrorReason::from_stream_error(&err);
        tracing::warn!(error = %err, reason = reason.as_str(), "Sink write failed");
        metrics::record_stream_error(reason);
        SessionOutcome::SinkFailed
    }

    async fn producer_failed(&mut self, err: ProducerError) -> SessionOutcome {
        self.transition(SessionState::Failing);
        tracing::error!(error = %err, "Producer failed");
        metrics::record_producer_error(self.producer_name);

        match encode(&error_event(&err.to_string())) {
            Ok(frame) => match self.write(frame).await {
                Ok(()) => self.frames += 1,
                Err(e) => tracing::debug!(error = %e, "Error frame not delivered"),
            },
            Err(e) => tracing::debug!(error = %e, "Error frame not encodable"),
        }
        SessionOutcome::ProducerFailed
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionReport {
        self.transition(SessionState::Closed);
        self.producer = None;
        self.guard = None;

        let duration = match self.started {
            Some(started) => {
                let duration = started.elapsed();
                metrics::record_stream_end(outcome.as_str(), duration);
                duration
            }
            None => Duration::ZERO,
        };

        let report = SessionReport {
            id: self.id,
            producer: self.producer_name,
            outcome,
            frames: self.frames,
            keepalives: self.keepalives,
            bytes: self.bytes,
            duration,
        };
        tracing::info!(
            outcome = outcome.as_str(),
            frames = report.frames,
            keepalives = report.keepalives,
            bytes = report.bytes,
            duration_ms = duration.as_millis() as u64,
            "Session closed"
        );

        self.report = Some(report.clone());
        report
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}

impl<S> Drop for StreamSession<S> {
    fn drop(&mut self) {
        // A run future dropped mid-stream never reached finish()
        if self.report.is_none() {
            if let Some(started) = self.started {
                metrics::record_stream_end(SessionOutcome::Cancelled.as_str(), started.elapsed());
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
