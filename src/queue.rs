//! Connector event queue: single-consumer, multi-producer FIFO that reports
//! an exact new-size from `enqueue` and an exact remaining-size from
//! `dequeue`, as required by the Frame's size==1 fast path and the drain
//! loop's `remaining > 0` tie-break.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct EventQueue<T> {
    inner: SegQueue<T>,
    size: AtomicUsize,
    unreacted: AtomicBool,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        EventQueue {
            inner: SegQueue::new(),
            size: AtomicUsize::new(0),
            unreacted: AtomicBool::new(false),
        }
    }

    /// Push `x`, returning the queue's size immediately after the push.
    pub fn enqueue(&self, x: T) -> usize {
        self.inner.push(x);
        self.size.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Pop one element, returning it along with the size remaining after
    /// the pop. Returns `(None, current_size)` if the queue was empty.
    pub fn dequeue(&self) -> (Option<T>, usize) {
        match self.inner.pop() {
            Some(item) => {
                let prev = self.size.fetch_sub(1, Ordering::AcqRel);
                (Some(item), prev - 1)
            }
            None => (None, self.size.load(Ordering::Acquire)),
        }
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminator signal: marks the queue unreacted. No further delivery is
    /// expected past this point. Idempotent.
    pub fn unreact(&self) {
        self.unreacted.store(true, Ordering::Release);
    }

    pub fn has_unreacted(&self) -> bool {
        self.unreacted.load(Ordering::Acquire)
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_reports_new_size() {
        let q = EventQueue::new();
        assert_eq!(q.enqueue(1), 1);
        assert_eq!(q.enqueue(2), 2);
        assert_eq!(q.enqueue(3), 3);
    }

    #[test]
    fn dequeue_reports_remaining_size_and_fifo_order() {
        let q = EventQueue::new();
        q.enqueue("a");
        q.enqueue("b");
        q.enqueue("c");

        let (item, remaining) = q.dequeue();
        assert_eq!(item, Some("a"));
        assert_eq!(remaining, 2);

        let (item, remaining) = q.dequeue();
        assert_eq!(item, Some("b"));
        assert_eq!(remaining, 1);

        let (item, remaining) = q.dequeue();
        assert_eq!(item, Some("c"));
        assert_eq!(remaining, 0);
    }

    #[test]
    fn unreact_is_idempotent_and_observable() {
        let q: EventQueue<i32> = EventQueue::new();
        assert!(!q.has_unreacted());
        q.unreact();
        q.unreact();
        assert!(q.has_unreacted());
    }

    #[test]
    fn dequeue_empty_returns_none_and_zero() {
        let q: EventQueue<i32> = EventQueue::new();
        let (item, remaining) = q.dequeue();
        assert_eq!(item, None);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn concurrent_producers_preserve_total_count() {
        use std::sync::Arc;
        let q = Arc::new(EventQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        q.enqueue(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 8000);
        let mut drained = 0;
        while q.dequeue().0.is_some() {
            drained += 1;
        }
        assert_eq!(drained, 8000);
    }
}
