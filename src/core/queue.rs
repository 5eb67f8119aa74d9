use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    in_flight: usize,
}

/// Unbounded FIFO shared between any number of producers and one consumer.
///
/// Producers never block. The consumer pairs every successful [`pop`] with a
/// [`finish`] once the item has been handled, which lets other tasks wait
/// until the queue is both empty and idle.
///
/// [`pop`]: WorkQueue::pop
/// [`finish`]: WorkQueue::finish
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    pushed: Notify,
    drained: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                in_flight: 0,
            }),
            pushed: Notify::new(),
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        // A panic while holding this lock cannot leave the deque half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.pushed.notify_one();
    }

    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            state.in_flight += 1;
        }
        item
    }

    /// Mark one popped item as handled.
    pub fn finish(&self) {
        let idle = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.items.is_empty() && state.in_flight == 0
        };
        if idle {
            self.drained.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// True when nothing is queued and nothing popped is still being handled.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.items.is_empty() && state.in_flight == 0
    }

    /// Resolve once at least one item is queued.
    pub async fn wait_for_work(&self) {
        while self.is_empty() {
            self.pushed.notified().await;
        }
    }

    /// Resolve once the queue is empty and every popped item is finished.
    pub async fn wait_drained(&self) {
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), Some("c"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_drained_tracks_in_flight_items() {
        let queue = WorkQueue::new();
        assert!(queue.is_drained());
        queue.push(1);
        assert!(!queue.is_drained());
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.is_empty());
        assert!(!queue.is_drained());
        queue.finish();
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_wait_for_work_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.wait_for_work().await;
                queue.pop()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(42);
        let popped = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, Some(42));
    }

    #[tokio::test]
    async fn test_wait_drained_resolves_after_finish() {
        let queue = Arc::new(WorkQueue::new());
        queue.push("item");
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_drained().await })
        };

        assert_eq!(queue.pop(), Some("item"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        queue.finish();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(WorkQueue::new());
        let mut handles = Vec::new();
        for producer in 0..4u32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..100u32 {
                    queue.push(producer * 1000 + n);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut seen = 0;
        while queue.pop().is_some() {
            queue.finish();
            seen += 1;
        }
        assert_eq!(seen, 400);
        assert!(queue.is_drained());
    }
}
