//! Countdown barrier for counted startup advertisements.

use std::sync::Arc;
use tokio::sync::watch;

/// Opens once `count` arrivals have been recorded.
///
/// Arrivals beyond the count are accepted and ignored.
#[derive(Debug, Clone)]
pub struct CountdownBarrier {
    remaining: Arc<watch::Sender<usize>>,
}

impl CountdownBarrier {
    pub fn new(count: usize) -> Self {
        let (tx, _) = watch::channel(count);
        Self {
            remaining: Arc::new(tx),
        }
    }

    /// Record one arrival. Returns how many are still outstanding.
    pub fn arrive(&self) -> usize {
        let mut left = 0;
        self.remaining.send_modify(|remaining| {
            *remaining = remaining.saturating_sub(1);
            left = *remaining;
        });
        left
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }

    /// Resolve once every expected arrival has been recorded.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|remaining| *remaining == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn opens_after_count_arrivals() {
        let barrier = CountdownBarrier::new(3);
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };

        assert_eq!(barrier.arrive(), 2);
        assert_eq!(barrier.arrive(), 1);
        assert!(!barrier.is_open());
        assert_eq!(barrier.arrive(), 0);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(barrier.is_open());
    }

    #[tokio::test]
    async fn extra_arrivals_saturate() {
        let barrier = CountdownBarrier::new(1);
        barrier.arrive();
        assert_eq!(barrier.arrive(), 0);
        barrier.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_without_arrivals() {
        let barrier = CountdownBarrier::new(2);
        barrier.arrive();
        let waited = tokio::time::timeout(Duration::from_secs(5), barrier.wait()).await;
        assert!(waited.is_err());
        assert_eq!(barrier.remaining(), 1);
    }
}
