//! Cancellation coordination for the watch pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Single-shot cancellation signal.
///
/// Provides a broadcast channel that long-running tasks subscribe to. Only
/// the first [`Canceller::trigger`] has an effect; later calls are no-ops.
#[derive(Clone)]
pub struct Canceller {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl Canceller {
    /// Create a new cancellation signal.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the signal.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            fired: Arc::clone(&self.fired),
        }
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(());
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`Canceller`].
pub struct CancelToken {
    rx: broadcast::Receiver<()>,
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        // A closed channel means every Canceller is gone and nobody can fire.
        if self.rx.recv().await.is_err() && !self.is_cancelled() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_trigger_has_no_effect() {
        let canceller = Canceller::new();
        let mut token = canceller.token();

        assert!(canceller.trigger());
        assert!(!canceller.trigger());
        assert!(token.is_cancelled());

        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("token should resolve");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_signal() {
        let canceller = Canceller::new();
        canceller.trigger();

        let mut token = canceller.token();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("late token should resolve");
    }

    #[tokio::test]
    async fn test_pending_until_triggered() {
        let canceller = Canceller::new();
        let mut token = canceller.token();

        let waited = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(waited.is_err());
        assert_eq!(canceller.receiver_count(), 1);
    }
}
