//! Counts normalization tasks started since the last connectivity loss.
//!
//! A reset starts a new generation. Guards from an older generation drop
//! without touching the new count, so a reconnect never sees a count that
//! goes negative or stays inflated by tasks it did not start.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Counter {
    generation: u64,
    count: usize,
}

#[derive(Default)]
pub struct InFlightTracker {
    counter: Mutex<Counter>,
    changed: Notify,
}

/// Decrements its generation's count exactly once, on drop.
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
    generation: u64,
}

impl InFlightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        let mut counter = self.counter.lock();
        counter.count += 1;
        InFlightGuard {
            tracker: Arc::clone(self),
            generation: counter.generation,
        }
    }

    pub fn count(&self) -> usize {
        self.counter.lock().count
    }

    /// Forget all outstanding work and wake idle waiters.
    pub fn reset(&self) {
        {
            let mut counter = self.counter.lock();
            counter.generation = counter.generation.wrapping_add(1);
            counter.count = 0;
        }
        self.changed.notify_waiters();
    }

    /// Resolves when the current generation has no outstanding work.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self, generation: u64) {
        let idle = {
            let mut counter = self.counter.lock();
            if counter.generation != generation {
                return;
            }
            counter.count = counter.count.saturating_sub(1);
            counter.count == 0
        };
        if idle {
            self.changed.notify_waiters();
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn guards_count_up_and_down() {
        let tracker = InFlightTracker::new();
        let a = tracker.begin();
        let b = tracker.begin();
        assert_eq!(tracker.count(), 2);
        drop(a);
        assert_eq!(tracker.count(), 1);
        drop(b);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn stale_guards_do_not_touch_new_generation() {
        let tracker = InFlightTracker::new();
        let old = tracker.begin();
        tracker.reset();
        let new = tracker.begin();
        assert_eq!(tracker.count(), 1);
        drop(old);
        assert_eq!(tracker.count(), 1);
        drop(new);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn guard_releases_on_panic() {
        let tracker = InFlightTracker::new();
        let guard = tracker.begin();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("normalizer failed");
        }));
        assert!(result.is_err());
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_last_guard_drops() {
        let tracker = InFlightTracker::new();
        let guard = tracker.begin();
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reset_wakes_waiters() {
        let tracker = InFlightTracker::new();
        let _guard = tracker.begin();
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.reset();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
