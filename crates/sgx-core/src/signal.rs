//! One-shot broadcast stop signal.
//!
//! Every `ListAndWatch` stream of a controller generation waits on the same
//! `StopSignal`. Triggering releases all waiters at once; triggering again is
//! a no-op. A new controller allocates a new signal.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trigger the signal. Returns `true` if this call triggered it and
    /// `false` if it had already been triggered.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is triggered, immediately if it already was.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
