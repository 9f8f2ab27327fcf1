//! Readiness gate.
//!
//! A one-shot latch created once per client. Independently triggered commands
//! wait on it before looking for a server session; activation signals it once
//! the server is usable or definitively unavailable (skipped, missing binary,
//! failed launch). The latch moves `Pending -> Ready` exactly once and never
//! goes back.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Wait until the gate is ready. Returns immediately if it already is.
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Perform the single `Pending -> Ready` transition.
    ///
    /// Returns `true` for the call that flipped the latch and `false` for every
    /// later call.
    pub fn signal_ready(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
