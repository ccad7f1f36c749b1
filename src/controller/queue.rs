use crate::sync::{lock, wait_until};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub const DEFAULT_RX_QUEUE_CAPACITY: usize = 2000;

/// Bounded FIFO shared between the delivery thread and the application.
///
/// Full queues drop their oldest entry. Producers never block.
pub struct ReceiveQueue<T> {
    items: ArrayQueue<T>,
    signal: Mutex<()>,
    available: Condvar,
    dropped: AtomicU64,
}

impl<T> ReceiveQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            signal: Mutex::new(()),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, item: T) {
        let _guard = lock(&self.signal);
        if self.items.force_push(item).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.available.notify_all();
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.pop_timeout_unless(timeout, || false)
    }

    /// Like [`pop_timeout`](Self::pop_timeout), but returns `None` as soon as
    /// `abort` holds. `abort` is re-checked on every [`wake`](Self::wake).
    pub fn pop_timeout_unless(&self, timeout: Duration, mut abort: impl FnMut() -> bool) -> Option<T> {
        if let Some(item) = self.items.pop() {
            return Some(item);
        }
        let mut popped = None;
        let guard = lock(&self.signal);
        let _ = wait_until(&self.available, guard, timeout, |_| {
            if abort() {
                return true;
            }
            popped = self.items.pop();
            popped.is_some()
        });
        popped
    }

    /// Wakes blocked consumers without pushing anything.
    pub fn wake(&self) {
        let _guard = lock(&self.signal);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = ReceiveQueue::new(4);
        for i in 0..3 {
            queue.push(i);
        }
        assert_eq!(queue.try_pop(), Some(0));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = ReceiveQueue::new(2);
        queue.push('a');
        queue.push('b');
        queue.push('c');
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some('b'));
        assert_eq!(queue.try_pop(), Some('c'));
    }

    #[test]
    fn test_wake_interrupts_blocked_pop() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::time::Instant;

        let queue: Arc<ReceiveQueue<u8>> = Arc::new(ReceiveQueue::new(4));
        let aborted = Arc::new(AtomicBool::new(false));
        let (remote, flag) = (Arc::clone(&queue), Arc::clone(&aborted));
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
            remote.wake();
        });
        let start = Instant::now();
        let popped = queue.pop_timeout_unless(Duration::from_secs(5), || aborted.load(Ordering::SeqCst));
        assert_eq!(popped, None);
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue: ReceiveQueue<u8> = ReceiveQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), None);
    }
}
