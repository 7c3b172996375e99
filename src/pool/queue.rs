//! The MPMC work queue feeding the pool.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    terminated: bool,
}

/// FIFO multi-producer/multi-consumer queue with one-shot termination.
///
/// `enqueue` never blocks. `dequeue` blocks on an empty queue and fails with
/// [`Error::Terminated`] once [`WorkQueue::terminate`] has run; queued items
/// left at that point are only reachable through [`WorkQueue::drain`].
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    done: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                terminated: false,
            }),
            available: Condvar::new(),
            done: Condvar::new(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item and wake one consumer.
    ///
    /// # Panics
    /// If the queue has been terminated; a producer racing termination is a
    /// protocol bug on the caller side.
    pub fn enqueue(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        assert!(!inner.terminated, "terminated work queue used");
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Pop the oldest item, blocking while the queue is empty.
    pub fn dequeue(&self) -> Result<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.terminated {
                return Err(Error::Terminated);
            }
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    /// One-shot termination: wakes every blocked consumer and every
    /// [`WorkQueue::await_terminated`] caller.
    pub fn terminate(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.terminated {
            return;
        }
        inner.terminated = true;
        drop(inner);
        self.available.notify_all();
        self.done.notify_all();
    }

    /// Block until termination has been signalled.
    pub fn await_terminated(&self) {
        let mut inner = self.inner.lock().unwrap();
        while !inner.terminated {
            inner = self.done.wait(inner).unwrap();
        }
    }

    /// Remove and return whatever is still queued.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap();
        inner.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fifo_at_dequeue_granularity() {
        let queue = WorkQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.dequeue().unwrap(), 1);
        assert_eq!(queue.dequeue().unwrap(), 2);
        assert_eq!(queue.dequeue().unwrap(), 3);
    }

    #[test]
    fn dequeue_blocks_until_an_item_arrives() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.dequeue().unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.enqueue(42);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn terminate_fails_blocked_consumers_in_bounded_time() {
        let queue = Arc::new(WorkQueue::<i32>::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.dequeue())
            })
            .collect();
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        queue.terminate();
        for consumer in consumers {
            assert!(matches!(consumer.join().unwrap(), Err(Error::Terminated)));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn dequeue_after_terminate_fails_even_with_items_queued() {
        let queue = WorkQueue::new();
        queue.enqueue("left behind");
        queue.terminate();
        assert!(queue.dequeue().is_err());
        assert_eq!(queue.drain(), vec!["left behind"]);
    }

    #[test]
    #[should_panic(expected = "terminated work queue used")]
    fn enqueue_after_terminate_asserts() {
        let queue = WorkQueue::new();
        queue.terminate();
        queue.enqueue(());
    }

    #[test]
    fn await_terminated_returns_once_signalled() {
        let queue = Arc::new(WorkQueue::<()>::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.await_terminated())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.terminate();
        waiter.join().unwrap();
    }
}
