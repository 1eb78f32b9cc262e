//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Runtime helpers supporting the daemon."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Set-once cooperative cancellation flag.
///
/// Starts unset, is triggered at most once and never resets. Every clone
/// observes the same flag, so a supervisor can hand copies to each loop that
/// must stop promptly.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set; resolves immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleep for `duration` unless the flag is set first.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// sleep was cut short by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.wait() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
