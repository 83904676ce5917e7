//! Hybrid direct-handoff / priority-buffered blocking queue.
//!
//! Two binary heaps share one mutex:
//!
//! - the **overflow** heap holds items transferred while nobody was waiting;
//!   the next consumer to arrive drains it first,
//! - the **priority** heap receives items while a consumer is blocked in
//!   [`TransferBusQueue::take`], so that consumer picks them up on wake-up.
//!
//! Both heaps order by `(priority, sequence)`: lower priority first, then
//! arrival order. Blocking calls re-arm a bounded wait so that
//! [`TransferBusQueue::deactivate`] is observed even if a wake-up is missed.
//!
//! The queue is built for one producer and at most one consumer blocked in
//! `take()` at a time. The waiting-consumer counter tolerates more, but
//! routing between the two heaps is only meaningful for 0 or 1.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use super::message::BusMessage;
use crate::config::BusConfig;

/// Default bounded wait between re-checks of the `active` flag.
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_millis(500);

struct Entry<T> {
    priority: i32,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap is a max-heap; reversed so the smallest (priority, sequence) pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.priority, other.sequence).cmp(&(self.priority, self.sequence))
    }
}

struct Buffers<T> {
    priority: BinaryHeap<Entry<T>>,
    overflow: BinaryHeap<Entry<T>>,
    next_sequence: u64,
}

impl<T: BusMessage> Buffers<T> {
    fn new() -> Self {
        Self {
            priority: BinaryHeap::new(),
            overflow: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    fn entry(&mut self, item: T) -> Entry<T> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Entry {
            priority: item.priority(),
            sequence,
            item,
        }
    }

    fn pop_next(&mut self) -> Option<Entry<T>> {
        self.overflow.pop().or_else(|| self.priority.pop())
    }

    fn peek_next(&self) -> Option<&T> {
        self.overflow
            .peek()
            .or_else(|| self.priority.peek())
            .map(|entry| &entry.item)
    }

    fn len(&self) -> usize {
        self.priority.len() + self.overflow.len()
    }
}

/// Priority-ordered blocking queue with direct-handoff semantics.
///
/// `transfer` never blocks; `take` and `peek` block until an item arrives
/// or the queue is deactivated.
///
/// # Example
/// ```
/// use robobus::bus::{Command, TransferBusQueue};
///
/// let queue = TransferBusQueue::new();
/// queue.transfer(Command::new("a", ()).with_priority(5));
/// queue.transfer(Command::new("b", ()).with_priority(1));
///
/// assert_eq!(queue.size(), 2);
/// assert_eq!(*queue.take().unwrap().kind(), "b");
/// assert_eq!(*queue.take().unwrap().kind(), "a");
/// ```
pub struct TransferBusQueue<T> {
    buffers: Mutex<Buffers<T>>,
    /// Wakes consumers blocked in `take()`.
    consumer_ready: Condvar,
    /// Wakes callers blocked in `peek()`.
    element_ready: Condvar,
    waiting_consumers: AtomicUsize,
    active: AtomicBool,
    await_timeout: Duration,
}

impl<T: BusMessage> TransferBusQueue<T> {
    /// Creates an active queue with [`DEFAULT_AWAIT_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_await_timeout(DEFAULT_AWAIT_TIMEOUT)
    }

    /// Creates an active queue that re-checks its `active` flag at least
    /// once per `await_timeout` while blocked.
    pub fn with_await_timeout(await_timeout: Duration) -> Self {
        Self {
            buffers: Mutex::new(Buffers::new()),
            consumer_ready: Condvar::new(),
            element_ready: Condvar::new(),
            waiting_consumers: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            await_timeout,
        }
    }

    /// Creates a queue from the `bus` config section.
    pub fn from_config(config: &BusConfig) -> Self {
        Self::with_await_timeout(Duration::from_millis(config.await_timeout_ms))
    }

    fn lock(&self) -> MutexGuard<'_, Buffers<T>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_all(&self) {
        self.consumer_ready.notify_all();
        self.element_ready.notify_all();
    }

    /// Inserts under the lock and reports whether a consumer was waiting.
    fn insert(&self, item: T) -> bool {
        let mut buffers = self.lock();
        let entry = buffers.entry(item);
        let waiting = self.has_waiting_consumer();
        if waiting {
            buffers.priority.push(entry);
        } else {
            buffers.overflow.push(entry);
        }
        drop(buffers);
        self.notify_all();
        waiting
    }

    /// Inserts `item`. Never blocks beyond the critical section.
    ///
    /// With a consumer blocked in [`take`](Self::take) the item lands in the
    /// priority heap and that consumer is woken; otherwise it is held in the
    /// overflow heap for the next consumer to arrive.
    pub fn transfer(&self, item: T) {
        self.insert(item);
    }

    /// Inserts `item` only if a consumer is currently waiting.
    ///
    /// When nobody is listening the item is handed back untouched as
    /// `Err(item)`, and the queue is unchanged.
    pub fn try_transfer(&self, item: T) -> Result<(), T> {
        let mut buffers = self.lock();
        if !self.has_waiting_consumer() {
            return Err(item);
        }
        let entry = buffers.entry(item);
        buffers.priority.push(entry);
        drop(buffers);
        self.notify_all();
        Ok(())
    }

    /// Inserts `item` exactly like [`transfer`](Self::transfer) and returns
    /// whether a consumer was waiting at the moment of insertion.
    ///
    /// The timeout is accepted for API compatibility but never waited on;
    /// the item is always enqueued.
    pub fn try_transfer_timeout(&self, item: T, _timeout: Duration) -> bool {
        self.insert(item)
    }

    /// Removes and returns the next item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is deactivated and nothing is left.
    /// [`BusMessage::on_taken`] runs on the returned item.
    pub fn take(&self) -> Option<T> {
        let mut buffers = self.lock();
        if let Some(entry) = buffers.overflow.pop() {
            drop(buffers);
            self.consumer_ready.notify_all();
            entry.item.on_taken();
            return Some(entry.item);
        }

        self.waiting_consumers.fetch_add(1, Ordering::SeqCst);
        let mut await_cycles: u64 = 0;
        let taken = loop {
            if let Some(entry) = buffers.pop_next() {
                break Some(entry);
            }
            if !self.is_active() {
                break None;
            }
            let (guard, _) = self
                .consumer_ready
                .wait_timeout(buffers, self.await_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            buffers = guard;
            await_cycles += 1;
        };
        self.waiting_consumers.fetch_sub(1, Ordering::SeqCst);
        drop(buffers);
        self.consumer_ready.notify_all();

        trace!(await_cycles, found = taken.is_some(), "take finished");
        taken.map(|entry| {
            entry.item.on_taken();
            entry.item
        })
    }

    /// Returns a copy of the item the next [`take`](Self::take) would
    /// return, blocking while the queue is empty.
    ///
    /// Does not count as a waiting consumer. Returns `None` once the queue is
    /// deactivated and nothing is left.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let mut buffers = self.lock();
        loop {
            if let Some(item) = buffers.peek_next() {
                return Some(item.clone());
            }
            if !self.is_active() {
                return None;
            }
            let (guard, _) = self
                .element_ready
                .wait_timeout(buffers, self.await_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            buffers = guard;
        }
    }

    /// Number of buffered items across both heaps.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns `true` if a consumer is blocked in `take()`.
    pub fn has_waiting_consumer(&self) -> bool {
        self.waiting_consumers.load(Ordering::SeqCst) != 0
    }

    /// Number of consumers blocked in `take()`.
    pub fn waiting_consumer_count(&self) -> usize {
        self.waiting_consumers.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Marks the queue inactive and wakes every blocked `take()`/`peek()`.
    ///
    /// Buffered items stay available; blocked callers return `None` only
    /// when both heaps are empty.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        // Taking the lock orders the store before any waiter's next re-check.
        drop(self.lock());
        self.notify_all();
        debug!(remaining = self.size(), "bus queue deactivated");
    }
}

impl<T: BusMessage> Default for TransferBusQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: BusMessage> fmt::Debug for TransferBusQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBusQueue")
            .field("size", &self.size())
            .field("waiting_consumers", &self.waiting_consumer_count())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::Command;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    type TestCommand = Command<&'static str, u32>;

    fn cmd(kind: &'static str, priority: i32) -> TestCommand {
        Command::new(kind, 0).with_priority(priority)
    }

    fn wait_for_consumer<T: BusMessage>(queue: &TransferBusQueue<T>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !queue.has_waiting_consumer() {
            assert!(Instant::now() < deadline, "consumer never started waiting");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_priority_then_arrival_order() {
        let queue = TransferBusQueue::new();
        queue.transfer(cmd("A", 5));
        queue.transfer(cmd("B", 1));
        queue.transfer(cmd("C", 1));

        let order: Vec<_> = (0..3).map(|_| *queue.take().unwrap().kind()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_transfer_without_consumer_goes_to_overflow() {
        let queue = TransferBusQueue::new();
        queue.transfer(cmd("A", 0));
        let buffers = queue.lock();
        assert_eq!(buffers.overflow.len(), 1);
        assert!(buffers.priority.is_empty());
    }

    #[test]
    fn test_transfer_with_waiting_consumer_goes_to_priority() {
        let queue = Arc::new(TransferBusQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take())
        };
        wait_for_consumer(&queue);

        assert!(queue.try_transfer_timeout(cmd("X", 0), Duration::from_millis(10)));
        let taken = consumer.join().unwrap().unwrap();
        assert_eq!(*taken.kind(), "X");
        assert_eq!(queue.waiting_consumer_count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_transfer_without_consumer_hands_item_back() {
        let queue = TransferBusQueue::new();
        let rejected = queue.try_transfer(cmd("A", 0)).unwrap_err();
        assert_eq!(*rejected.kind(), "A");
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_try_transfer_with_consumer() {
        let queue = Arc::new(TransferBusQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take())
        };
        wait_for_consumer(&queue);

        assert!(queue.try_transfer(cmd("A", 0)).is_ok());
        assert_eq!(*consumer.join().unwrap().unwrap().kind(), "A");
    }

    #[test]
    fn test_try_transfer_timeout_always_enqueues() {
        let queue = TransferBusQueue::new();
        let delivered = queue.try_transfer_timeout(cmd("A", 0), Duration::from_secs(1));
        assert!(!delivered);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_peek_does_not_remove_or_count_as_consumer() {
        let queue = TransferBusQueue::new();
        queue.transfer(cmd("A", 2));
        queue.transfer(cmd("B", 1));

        let head = queue.peek().unwrap();
        assert_eq!(*head.kind(), "B");
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.waiting_consumer_count(), 0);
        assert_eq!(*queue.take().unwrap().kind(), "B");
    }

    #[test]
    fn test_peek_blocks_until_transfer() {
        let queue = Arc::new(TransferBusQueue::<TestCommand>::with_await_timeout(
            Duration::from_millis(20),
        ));
        let peeker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.peek())
        };
        thread::sleep(Duration::from_millis(50));
        queue.transfer(cmd("late", 0));

        assert_eq!(*peeker.join().unwrap().unwrap().kind(), "late");
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_deactivate_returns_none_when_empty() {
        let queue = TransferBusQueue::<TestCommand>::new();
        queue.deactivate();
        assert!(!queue.is_active());
        assert!(queue.take().is_none());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_deactivate_keeps_buffered_items() {
        let queue = TransferBusQueue::new();
        queue.transfer(cmd("A", 0));
        queue.deactivate();
        assert_eq!(*queue.peek().unwrap().kind(), "A");
        assert_eq!(*queue.take().unwrap().kind(), "A");
        assert!(queue.take().is_none());
    }

    #[test]
    fn test_deactivate_wakes_blocked_take() {
        let queue = Arc::new(TransferBusQueue::<TestCommand>::with_await_timeout(
            Duration::from_secs(30),
        ));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take())
        };
        wait_for_consumer(&queue);

        let started = Instant::now();
        queue.deactivate();
        assert!(consumer.join().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(queue.waiting_consumer_count(), 0);
    }

    #[test]
    fn test_set_active_after_deactivate() {
        let queue = TransferBusQueue::<TestCommand>::new();
        queue.deactivate();
        queue.set_active();
        assert!(queue.is_active());
    }

    #[derive(Clone)]
    struct Latched {
        released: Arc<AtomicUsize>,
    }

    impl BusMessage for Latched {
        fn on_taken(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_on_taken_runs_once_per_take() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = TransferBusQueue::new();
        queue.transfer(Latched {
            released: Arc::clone(&released),
        });

        queue.peek().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        queue.take().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_output() {
        let queue = TransferBusQueue::new();
        queue.transfer(cmd("A", 0));
        let debug = format!("{:?}", queue);
        assert!(debug.contains("size: 1"));
        assert!(debug.contains("active: true"));
    }
}
