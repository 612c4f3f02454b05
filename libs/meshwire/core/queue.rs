//! Bounded FIFO between producer threads and the I/O worker
//!
//! # Architecture
//!
//! ```text
//! send() ──┐
//! send() ──┼──> BoundedQueue (capacity N) ──> I/O worker
//! send() ──┘        │
//!                   └─ own Mutex + not_empty / not_full Condvars
//! ```
//!
//! The queue lock is independent of the client's state mutex. Producers
//! only ever block here, never on the network.

use crate::error::MeshError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// An enqueue that was refused, handing the item back
pub struct Rejected<T> {
    pub error: MeshError,
    pub item: T,
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish()
    }
}

impl<T> From<Rejected<T>> for MeshError {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity, thread-safe FIFO
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Block until there is room, then append `item`
    pub fn enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        let mut inner = self.inner.lock();
        while !inner.closed && inner.items.len() >= self.capacity {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(Rejected {
                error: MeshError::QueueClosed,
                item,
            });
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append `item` without blocking, failing with `QueueFull` at capacity
    pub fn try_enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Rejected {
                error: MeshError::QueueClosed,
                item,
            });
        }
        if inner.items.len() >= self.capacity {
            return Err(Rejected {
                error: MeshError::QueueFull,
                item,
            });
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available
    ///
    /// Items enqueued before `close()` are still handed out; `QueueClosed`
    /// is returned only once the queue is closed and drained.
    pub fn dequeue(&self) -> Result<T, MeshError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(MeshError::QueueClosed);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// As [`dequeue`](Self::dequeue), failing with `QueueTimeout` after `timeout`
    pub fn timed_dequeue(&self, timeout: Duration) -> Result<T, MeshError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(MeshError::QueueClosed);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                // An item may have raced in with the timeout
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                return Err(if inner.closed {
                    MeshError::QueueClosed
                } else {
                    MeshError::QueueTimeout
                });
            }
        }
    }

    /// Take the head item if there is one
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue and wake every waiter
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Remove and return everything still queued
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.inner.lock().items.drain(..).collect();
        if !items.is_empty() {
            self.not_full.notify_all();
        }
        items
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &inner.items.len())
            .field("capacity", &self.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_then_full() {
        let queue = BoundedQueue::new(3);
        for i in 0..3 {
            queue.try_enqueue(i).unwrap();
        }
        let rejected = queue.try_enqueue(3).unwrap_err();
        assert_eq!(rejected.error, MeshError::QueueFull);
        assert_eq!(rejected.into_inner(), 3);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(5);
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }
        let out: Vec<_> = (0..5).map(|_| queue.dequeue().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_close_drains_then_fails() {
        let queue = BoundedQueue::new(2);
        queue.enqueue("a").unwrap();
        queue.close();

        assert_eq!(queue.enqueue("b").unwrap_err().error, MeshError::QueueClosed);
        assert_eq!(queue.dequeue().unwrap(), "a");
        assert_eq!(queue.dequeue().unwrap_err(), MeshError::QueueClosed);
    }

    #[test]
    fn test_timed_dequeue_times_out() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        let start = Instant::now();
        let err = queue.timed_dequeue(Duration::from_millis(30)).unwrap_err();
        assert_eq!(err, MeshError::QueueTimeout);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_try_dequeue_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap().unwrap_err(), MeshError::QueueClosed);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.enqueue(1).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(2).map_err(|r| r.error))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(producer.join().unwrap().unwrap_err(), MeshError::QueueClosed);
    }

    #[test]
    fn test_blocked_producer_resumes_after_dequeue() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.enqueue(1).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(2).map_err(|r| r.error))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.dequeue().unwrap(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.dequeue().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(BoundedQueue::new(8));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = Vec::with_capacity(1000);
        for _ in 0..1000 {
            seen.push(queue.dequeue().unwrap());
            assert!(queue.len() <= queue.capacity());
        }
        for handle in producers {
            handle.join().unwrap();
        }

        // Per-producer order is preserved
        for p in 0..4 {
            let mine: Vec<_> = seen.iter().copied().filter(|v| v / 1000 == p).collect();
            let expected: Vec<_> = (0..250).map(|i| p * 1000 + i).collect();
            assert_eq!(mine, expected);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }
}
