//! Unbounded single-consumer async queue.
//!
//! `enqueue` never blocks: an item is handed directly to a suspended
//! consumer if there is one, otherwise it is appended to the backlog.
//! `dequeue` returns the oldest backlogged item or suspends until the next
//! `enqueue` or `close`.
//!
//! Closing stops new input but keeps the backlog drainable.
//!
//! At most one `dequeue` may be suspended at a time. A second concurrent
//! call fails immediately with [`DapwireError::ConcurrentDequeue`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{DapwireError, Result};

struct QueueState<T> {
    items: VecDeque<T>,
    waiter: Option<oneshot::Sender<Result<T>>>,
    closed: bool,
}

/// FIFO hand-off queue with async dequeue.
pub struct AsyncQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiter: None,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // The state is consistent at every unlock, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an item, waking the suspended consumer if any.
    ///
    /// Fails with [`DapwireError::Closed`] after `close()`.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(DapwireError::Closed);
        }

        let item = match state.waiter.take() {
            // A consumer that gave up its dequeue hands the item back.
            Some(waiter) => match waiter.send(Ok(item)) {
                Ok(()) => return Ok(()),
                Err(Ok(item)) => item,
                Err(Err(_)) => return Ok(()),
            },
            None => item,
        };

        state.items.push_back(item);
        Ok(())
    }

    /// Take the oldest item, suspending until one is available.
    ///
    /// Fails with [`DapwireError::Closed`] once the queue is closed and
    /// drained.
    pub async fn dequeue(&self) -> Result<T> {
        let rx = {
            let mut state = self.lock();
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(DapwireError::Closed);
            }
            if state.waiter.as_ref().is_some_and(|w| !w.is_closed()) {
                return Err(DapwireError::ConcurrentDequeue);
            }

            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        rx.await.unwrap_or(Err(DapwireError::Closed))
    }

    /// Take the oldest item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Close the queue. Idempotent.
    ///
    /// A suspended `dequeue` fails with [`DapwireError::Closed`].
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(Err(DapwireError::Closed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of backlogged items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AsyncQueue")
            .field("len", &state.items.len())
            .field("waiting", &state.waiter.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = AsyncQueue::new();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        queue.enqueue(3).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().await.unwrap(), 1);
        assert_eq!(queue.dequeue().await.unwrap(), 2);
        assert_eq!(queue.dequeue().await.unwrap(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_direct_hand_off_to_waiting_consumer() {
        let queue = Arc::new(AsyncQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue("hello").unwrap();

        assert_eq!(consumer.await.unwrap().unwrap(), "hello");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_backlog_then_fails() {
        let queue = AsyncQueue::new();
        queue.enqueue('a').unwrap();
        queue.enqueue('b').unwrap();
        queue.close();

        assert_eq!(queue.dequeue().await.unwrap(), 'a');
        assert_eq!(queue.dequeue().await.unwrap(), 'b');
        assert!(matches!(queue.dequeue().await, Err(DapwireError::Closed)));
        assert!(matches!(queue.enqueue('c'), Err(DapwireError::Closed)));
    }

    #[tokio::test]
    async fn test_close_rejects_suspended_dequeue() {
        let queue = Arc::new(AsyncQueue::<u32>::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        queue.close();

        assert!(matches!(consumer.await.unwrap(), Err(DapwireError::Closed)));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_second_concurrent_dequeue_fails_fast() {
        let queue = Arc::new(AsyncQueue::<u32>::new());
        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            queue.dequeue().await,
            Err(DapwireError::ConcurrentDequeue)
        ));

        queue.enqueue(5).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_abandoned_dequeue_does_not_lose_items() {
        let queue = AsyncQueue::new();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), queue.dequeue()).await;
        assert!(abandoned.is_err());

        queue.enqueue(9).unwrap();
        assert_eq!(queue.try_dequeue(), Some(9));
    }
}
