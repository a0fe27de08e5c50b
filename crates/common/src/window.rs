//! Bounded most-recent-first window.
//!
//! Live feeds keep only the last N records they have seen. New records are
//! prepended and the oldest fall off the back, so the window stays ordered
//! by arrival without ever re-sorting.

use std::collections::VecDeque;

/// Prepend `item` to `existing` and cap the result at `capacity` elements.
///
/// Pure form of [`RecentWindow::push`] for callers that keep state as a
/// plain slice.
pub fn prepend_bounded<T: Clone>(existing: &[T], item: T, capacity: usize) -> Vec<T> {
    if capacity == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(capacity.min(existing.len() + 1));
    out.push(item);
    out.extend(existing.iter().take(capacity - 1).cloned());
    out
}

/// Fixed-capacity window holding the most recent items first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentWindow<T> {
    /// Create an empty window.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Create a window from a snapshot that is already newest-first.
    /// Anything past `capacity` is discarded.
    pub fn from_snapshot(snapshot: impl IntoIterator<Item = T>, capacity: usize) -> Self {
        let items: VecDeque<T> = snapshot.into_iter().take(capacity).collect();
        Self { items, capacity }
    }

    /// Replace the contents with a fresh newest-first snapshot.
    pub fn replace(&mut self, snapshot: impl IntoIterator<Item = T>) {
        self.items.clear();
        self.items.extend(snapshot.into_iter().take(self.capacity));
    }

    /// Prepend an item, evicting the oldest one if the window is full.
    /// Returns the evicted item.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        self.items.push_front(item);
        if self.items.len() > self.capacity {
            self.items.pop_back()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Most recent item.
    pub fn latest(&self) -> Option<&T> {
        self.items.front()
    }
}

impl<T: Clone> RecentWindow<T> {
    /// Copy the window out as a newest-first vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
