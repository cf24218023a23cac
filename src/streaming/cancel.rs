//! Session cancellation.
//!
//! A [`CancelHandle`] is held by whoever can observe the transport going away
//! (the HTTP body wrapper) or wants to stop a session explicitly. The session
//! holds the matching [`CancelSignal`], which can also follow the process-wide
//! shutdown broadcast.

use tokio::sync::watch;

/// Create a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelSignal { rx, shutdown: None },
    )
}

/// Triggers cancellation of one session.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observed by a session; set once cancellation or shutdown is requested.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self { rx, shutdown: None }
    }

    /// Also treat the given shutdown broadcast as cancellation.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Non-blocking check, used before every pull.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Pending forever if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        match &mut self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = wait_for_true(&mut self.rx) => {}
                    _ = wait_for_true(shutdown) => {}
                }
            }
            None => wait_for_true(&mut self.rx).await,
        }
    }
}

async fn wait_for_true(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
