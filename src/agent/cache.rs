//! Bounded log of recent agent activity.

use std::collections::VecDeque;
use std::fmt;

/// Number of records an agent keeps by default.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 10;

/// Fixed-capacity FIFO of records. Pushing into a full log evicts the oldest
/// record first; it never blocks and never fails.
///
/// # Example
/// ```
/// use robobus::agent::ActivityLog;
///
/// let mut log = ActivityLog::with_capacity(2);
/// log.push("ACTIVE");
/// log.push("FAILED");
/// log.push("STOPPED");
/// assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec!["FAILED", "STOPPED"]);
/// ```
#[derive(Clone)]
pub struct ActivityLog<R> {
    capacity: usize,
    records: VecDeque<R>,
}

impl<R> ActivityLog<R> {
    /// Creates a log holding [`DEFAULT_ACTIVITY_CAPACITY`] records.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }

    /// Creates a log holding at most `capacity` records (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a record, evicting the oldest one when full.
    ///
    /// Returns the evicted record, if any.
    pub fn push(&mut self, record: R) -> Option<R> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&R> {
        self.records.back()
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<R: Clone> ActivityLog<R> {
    /// Copies the records out, oldest first.
    pub fn snapshot(&self) -> Vec<R> {
        self.records.iter().cloned().collect()
    }
}

impl<R> Default for ActivityLog<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: fmt::Debug> fmt::Debug for ActivityLog<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.records.iter()).finish()
    }
}
