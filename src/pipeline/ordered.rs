//! Release results in submission order

use std::collections::BTreeMap;

/// Buffers out-of-order completions and hands them back in index order
#[derive(Debug)]
pub struct OrderedRelease<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for OrderedRelease<T> {
    fn default() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> OrderedRelease<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for `index` and return every result that is now
    /// releasable, in order
    pub fn complete(&mut self, index: usize, value: T) -> Vec<(usize, T)> {
        self.pending.insert(index, value);
        let mut ready = Vec::new();
        while let Some(value) = self.pending.remove(&self.next) {
            ready.push((self.next, value));
            self.next += 1;
        }
        ready
    }

    /// Results still waiting for an earlier index
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }
}
