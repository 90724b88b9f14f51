//! Least-recently-used ordering with a byte budget.
//!
//! Entries are ordered by a monotonic access tick. Touching an entry moves
//! it to the back; eviction pops from the front. The owner keeps the tick
//! of each entry so touch and removal are `O(log n)`.

use std::collections::BTreeMap;

#[derive(Debug)]
pub(crate) struct LruBudget<K> {
    /// Access order (front = oldest).
    order: BTreeMap<u64, K>,
    clock: u64,
    used: u64,
    max: u64,
}

impl<K: Clone> LruBudget<K> {
    pub(crate) fn with_budget(max: u64) -> Self {
        Self {
            order: BTreeMap::new(),
            clock: 0,
            used: 0,
            max,
        }
    }

    /// Registers a new entry of `size` bytes and returns its tick.
    pub(crate) fn admit(&mut self, key: K, size: u64) -> u64 {
        self.clock += 1;
        self.order.insert(self.clock, key);
        self.used += size;
        self.clock
    }

    /// Moves the entry at `tick` to the back and returns its new tick.
    pub(crate) fn touch(&mut self, tick: u64) -> u64 {
        match self.order.remove(&tick) {
            Some(key) => {
                self.clock += 1;
                self.order.insert(self.clock, key);
                self.clock
            }
            None => tick,
        }
    }

    /// Removes the entry at `tick`.
    pub(crate) fn forget(&mut self, tick: u64, size: u64) {
        if self.order.remove(&tick).is_some() {
            self.used = self.used.saturating_sub(size);
        }
    }

    /// Oldest entry.
    pub(crate) fn oldest(&self) -> Option<K> {
        self.order.first_key_value().map(|(_, k)| k.clone())
    }

    /// Whether `size` more bytes would exceed the budget.
    pub(crate) fn over_budget_with(&self, size: u64) -> bool {
        self.used.saturating_add(size) > self.max
    }

    /// Whether an entry of `size` bytes can ever fit.
    pub(crate) fn can_hold(&self, size: u64) -> bool {
        size <= self.max
    }

    pub(crate) fn used(&self) -> u64 {
        self.used
    }

    pub(crate) fn max(&self) -> u64 {
        self.max
    }
}
