//! # Bounded History
//!
//! Fixed-capacity FIFO buffers backing the altitude, battery, frame and event
//! histories. Pushing into a full buffer drops the oldest entry.

use std::collections::VecDeque;

/// A FIFO buffer that never holds more than `capacity` entries.
///
/// # Examples
///
/// ```
/// use drone_link::telemetry::history::BoundedHistory;
///
/// let mut history = BoundedHistory::new(2);
/// history.push(1);
/// history.push(2);
/// history.push(3);
/// assert_eq!(history.to_vec(), vec![2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Creates an empty history. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// The two most recent entries as `(earlier, later)`.
    pub fn last_pair(&self) -> Option<(&T, &T)> {
        let len = self.items.len();
        if len < 2 {
            return None;
        }
        Some((&self.items[len - 2], &self.items[len - 1]))
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Copy out the entries, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
