// SPDX-License-Identifier: MPL-2.0

//! Ordered command queue drained by the session actor
//!
//! Immediate items run in submission order. Delayed items join the tail of
//! the queue once their deadline passes; items with equal deadlines keep
//! their submission order.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Delayed<T> {
    due: Instant,
    seq: u64,
    item: T,
}

struct QueueInner<T> {
    ready: VecDeque<T>,
    /// Sorted by (due, seq)
    delayed: Vec<Delayed<T>>,
    next_seq: u64,
    quitting: bool,
}

impl<T> QueueInner<T> {
    /// Move every due delayed item to the ready tail
    fn promote_due(&mut self, now: Instant) {
        let due = self.delayed.partition_point(|d| d.due <= now);
        self.ready
            .extend(self.delayed.drain(..due).map(|delayed| delayed.item));
    }
}

pub(crate) struct CommandQueue<T> {
    inner: Mutex<QueueInner<T>>,
    available: Condvar,
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                ready: VecDeque::new(),
                delayed: Vec::new(),
                next_seq: 0,
                quitting: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item; returns false once the queue is quitting
    pub fn post(&self, item: T) -> bool {
        let mut inner = self.lock();
        if inner.quitting {
            return false;
        }
        inner.ready.push_back(item);
        self.available.notify_one();
        true
    }

    /// Append an item after `delay`; returns false once the queue is quitting
    pub fn post_delayed(&self, item: T, delay: Duration) -> bool {
        let mut inner = self.lock();
        if inner.quitting {
            return false;
        }
        let due = Instant::now() + delay;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let at = inner.delayed.partition_point(|d| (d.due, d.seq) <= (due, seq));
        inner.delayed.insert(at, Delayed { due, seq, item });
        self.available.notify_one();
        true
    }

    /// Stop accepting items
    ///
    /// Items already queued and delayed items that are due now are still
    /// handed out; delayed items that are not yet due are dropped.
    pub fn quit(&self) {
        let mut inner = self.lock();
        inner.quitting = true;
        inner.promote_due(Instant::now());
        inner.delayed.clear();
        self.available.notify_all();
    }

    /// Drop every waiting item matching `pred`, delayed ones included
    pub fn remove(&self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut inner = self.lock();
        let before = inner.ready.len() + inner.delayed.len();
        inner.ready.retain(|item| !pred(item));
        inner.delayed.retain(|delayed| !pred(&delayed.item));
        before - inner.ready.len() - inner.delayed.len()
    }

    /// Number of items waiting, delayed ones included
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.ready.len() + inner.delayed.len()
    }

    /// Block until the next item is available
    ///
    /// Returns `None` once the queue is quitting and drained.
    pub fn next(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            inner.promote_due(Instant::now());
            if let Some(item) = inner.ready.pop_front() {
                return Some(item);
            }
            if inner.quitting {
                return None;
            }
            inner = match inner.delayed.first().map(|d| d.due) {
                Some(due) => {
                    let wait = due.saturating_duration_since(Instant::now());
                    self.available
                        .wait_timeout(inner, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .available
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_items_come_out_in_submission_order() {
        let queue = CommandQueue::new();
        for i in 0..5 {
            assert!(queue.post(i));
        }
        let drained: Vec<_> = (0..5).filter_map(|_| queue.next()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_delayed_item_joins_tail_when_due() {
        let queue = CommandQueue::new();
        queue.post_delayed("late", Duration::from_millis(30));
        queue.post("first");
        assert_eq!(queue.next(), Some("first"));

        let started = Instant::now();
        assert_eq!(queue.next(), Some("late"));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_equal_deadlines_keep_order() {
        let queue = CommandQueue::new();
        queue.post_delayed(1, Duration::ZERO);
        queue.post_delayed(2, Duration::ZERO);
        assert_eq!(queue.next(), Some(1));
        assert_eq!(queue.next(), Some(2));
    }

    #[test]
    fn test_quit_drains_ready_and_drops_pending() {
        let queue = CommandQueue::new();
        queue.post(1);
        queue.post(2);
        queue.post_delayed(3, Duration::from_secs(60));
        queue.quit();

        assert!(!queue.post(4));
        assert!(!queue.post_delayed(5, Duration::ZERO));
        assert_eq!(queue.next(), Some(1));
        assert_eq!(queue.next(), Some(2));
        assert_eq!(queue.next(), None);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_remove_keeps_order_of_the_rest() {
        let queue = CommandQueue::new();
        for i in 0..6 {
            queue.post(i);
        }
        queue.post_delayed(8, Duration::ZERO);
        queue.post_delayed(9, Duration::ZERO);

        assert_eq!(queue.remove(|i| i % 2 == 0), 4);
        assert_eq!(queue.len(), 4);
        let drained: Vec<_> = (0..4).filter_map(|_| queue.next()).collect();
        assert_eq!(drained, vec![1, 3, 5, 9]);
    }

    #[test]
    fn test_quit_wakes_blocked_consumer() {
        let queue = Arc::new(CommandQueue::<u32>::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.next())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.quit();
        assert_eq!(consumer.join().unwrap(), None);
    }
}
