//! Producer trait definitions.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::error::ProducerError;
use crate::streaming::Event;

/// Wall-clock milliseconds since the Unix epoch, 0 if the clock is before it.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A stateful generator of logical events for one session.
///
/// `next()` yields `Some(Ok(event))`, `Some(Err(_))` on an unrecoverable
/// internal failure, or `None` once exhausted. After `None` every further
/// call returns `None` again.
///
/// Implementations must be cancel-safe: if the future returned by `next()` is
/// dropped while waiting, no event is lost and the pending deadline is kept,
/// so the session can race it against cancellation and keepalives.
#[async_trait]
pub trait Producer: Send {
    /// Producer name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Get the next event.
    async fn next(&mut self) -> Option<Result<Event, ProducerError>>;
}

/// Paces interval-based producers.
///
/// The first wait runs from the first call; later waits run from the moment
/// the previous event was handed out.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Sleep until the current deadline. Cancel-safe: the deadline is stored
    /// before suspending.
    pub async fn wait(&mut self) {
        let interval = self.interval;
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + interval);
        tokio::time::sleep_until(deadline).await;
    }

    /// Mark an event as emitted; the next wait starts now.
    pub fn emitted(&mut self) {
        self.deadline = Some(Instant::now() + self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pacer_waits_interval_from_first_call() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        let start = Instant::now();

        pacer.wait().await;
        assert_eq!(start.elapsed().as_millis(), 100);

        pacer.emitted();
        pacer.wait().await;
        assert_eq!(start.elapsed().as_millis(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_keeps_deadline_when_wait_is_dropped() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        let start = Instant::now();

        let interrupted =
            tokio::time::timeout(Duration::from_millis(30), pacer.wait()).await;
        assert!(interrupted.is_err());

        pacer.wait().await;
        assert_eq!(start.elapsed().as_millis(), 100);
    }
}
