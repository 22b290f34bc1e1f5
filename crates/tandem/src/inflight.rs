//! Counting of spawned operation and flow remainders.

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Tracks work spawned by the middleware so callers can wait for quiescence.
#[derive(Debug, Default)]
pub struct InflightTracker {
    count: AtomicUsize,
    idle: Notify,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Register one unit of work. It counts until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> InflightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Resolve once nothing is in flight.
    ///
    /// Work that is entered by a tracked task before that task finishes keeps
    /// the tracker busy, so follow-up dispatches are waited for as well.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps one unit of work counted while alive.
#[derive(Debug)]
pub struct InflightGuard {
    tracker: Arc<InflightTracker>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_tracker_resolves_immediately() {
        let tracker = InflightTracker::new();
        tracker.wait_idle().await;
        assert!(tracker.is_idle());
    }

    #[tokio::test]
    async fn waits_until_every_guard_is_dropped() {
        let tracker = Arc::new(InflightTracker::new());
        let first = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.count(), 2);

        let waiter = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.wait_idle().await }
        });

        drop(first);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("tracker never went idle")
            .unwrap();
    }

    #[tokio::test]
    async fn guard_released_by_a_panicking_task() {
        let tracker = Arc::new(InflightTracker::new());
        let guard = tracker.enter();

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("task failed");
        });
        assert!(task.await.is_err());

        assert!(tracker.is_idle());
    }
}
