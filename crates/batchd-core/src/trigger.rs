//! Coalescing wake-up signal shared by the maintenance loops

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Capacity-1 mailbox of wake-up tokens.
///
/// `signal` never blocks: when a token is already pending the call is a
/// no-op, so any burst of signals before a `wait` collapses into a single
/// wake-up. Clones share the same mailbox.
#[derive(Debug, Clone)]
pub struct TriggerQueue {
    tx: mpsc::Sender<()>,
    rx: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl TriggerQueue {
    /// Create an empty trigger queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Leave a wake-up token unless one is already pending
    pub fn signal(&self) {
        // Full means a wake-up is already pending; the receiver lives as long as self.
        let _ = self.tx.try_send(());
    }

    /// Block until a token is available, then consume it
    pub async fn wait(&self) {
        let mut rx = self.rx.lock().await;
        let _ = rx.recv().await;
    }

    /// Consume a pending token without blocking.
    ///
    /// Returns false when nothing was pending or another task is waiting.
    pub fn try_consume(&self) -> bool {
        match self.rx.try_lock() {
            Ok(mut rx) => rx.try_recv().is_ok(),
            Err(_) => false,
        }
    }
}

impl Default for TriggerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_burst_collapses_into_one_wakeup() {
        let trigger = TriggerQueue::new();
        for _ in 0..10 {
            trigger.signal();
        }

        trigger.wait().await;

        let second = tokio::time::timeout(Duration::from_millis(50), trigger.wait()).await;
        assert!(second.is_err(), "only one wake-up must be pending");
    }

    #[tokio::test]
    async fn test_signal_wakes_waiting_task() {
        let trigger = TriggerQueue::new();
        let waiter = trigger.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.signal();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_try_consume() {
        let trigger = TriggerQueue::new();
        assert!(!trigger.try_consume());

        trigger.signal();
        trigger.signal();
        assert!(trigger.try_consume());
        assert!(!trigger.try_consume());
    }
}
