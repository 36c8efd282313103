//! External cancellation signals
//!
//! An [`AbortController`] owns the one-way aborted flag; every
//! [`AbortSignal`] cloned from it observes the same flag. A task
//! scheduled with a signal settles with `task aborted` once the
//! controller fires, no matter what its worker does afterwards.

use tokio::sync::watch;

/// The owning side of an abort signal.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The observing side of an abort signal.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the controller fires. Never resolves if the
    /// controller is dropped without firing.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_observed() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        controller.abort();
        assert!(signal.is_aborted());
        signal.aborted().await;
    }

    #[tokio::test]
    async fn test_abort_before_subscribe() {
        let controller = AbortController::new();
        controller.abort();

        let signal = controller.signal();
        assert!(signal.is_aborted());
        signal.aborted().await;
    }

    #[tokio::test]
    async fn test_double_abort_is_idempotent() {
        let controller = AbortController::new();
        let signal = controller.signal();

        controller.abort();
        controller.abort();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn test_dropped_controller_never_resolves() {
        let controller = AbortController::new();
        let signal = controller.signal();
        drop(controller);

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            signal.aborted(),
        )
        .await;
        assert!(waited.is_err());
        assert!(!signal.is_aborted());
    }
}
