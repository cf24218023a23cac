//! Live session bookkeeping and shutdown broadcast.
//!
//! Sessions share nothing with each other; the registry only hands out ids,
//! counts live sessions, and broadcasts shutdown through a watch channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

use crate::metrics;

/// Registry of live stream sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Broadcast channel for shutdown signal.
    shutdown_tx: watch::Sender<bool>,
    /// Receiver for shutdown signal (cloned for each session).
    shutdown_rx: watch::Receiver<bool>,
    active_sessions: AtomicU64,
    drain_notify: Notify,
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(RegistryInner {
                shutdown_tx,
                shutdown_rx,
                active_sessions: AtomicU64::new(0),
                drain_notify: Notify::new(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Signal shutdown to all sessions.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_rx.borrow()
    }

    /// Get a receiver to watch for shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_rx.clone()
    }

    pub fn active_sessions(&self) -> u64 {
        self.inner.active_sessions.load(Ordering::Relaxed)
    }

    /// Register a new session and return a guard that unregisters on drop.
    pub fn register_session(&self) -> SessionGuard {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let new_count = self.inner.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_sessions(new_count);

        SessionGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Wait for all sessions to drain.
    pub async fn wait_for_drain(&self) {
        loop {
            // Arm the notification before the load so a drop in between is not missed
            let notified = self.inner.drain_notify.notified();
            if self.inner.active_sessions.load(Ordering::Relaxed) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn unregister_session(&self, id: u64) {
        let result = self.inner.active_sessions.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |curr| curr.checked_sub(1),
        );

        match result {
            Ok(prev) => {
                let new_count = prev - 1;
                metrics::set_active_sessions(new_count);
                if new_count == 0 {
                    self.inner.drain_notify.notify_waiters();
                }
            }
            Err(_) => {
                tracing::error!(id, "unregister_session called with active_sessions already at 0");
                metrics::set_active_sessions(0);
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one session's registration.
pub struct SessionGuard {
    registry: SessionRegistry,
    id: u64,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get a receiver to watch for shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.registry.subscribe()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister_session(self.id);
    }
}
