//! Run-scoped bookkeeping of dispatched-but-unconfirmed resources.

use std::collections::HashSet;

use crate::core::model::ResourceKey;

/// Result of trying to admit a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Added to the set.
    Admitted,
    /// Already in flight; not added again.
    Duplicate,
    /// Set is at capacity.
    Full,
}

/// Capacity-bounded set of in-flight resource keys.
///
/// Owned by exactly one run and passed by `&mut` through the loop.
#[derive(Debug)]
pub struct InFlightSet {
    capacity: usize,
    keys: HashSet<ResourceKey>,
    peak: usize,
}

impl InFlightSet {
    /// Empty set holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            keys: HashSet::with_capacity(capacity),
            peak: 0,
        }
    }

    /// Admit `key` if it is not already present and there is room.
    pub fn admit(&mut self, key: ResourceKey) -> Admission {
        if self.keys.contains(&key) {
            return Admission::Duplicate;
        }
        if self.keys.len() >= self.capacity {
            return Admission::Full;
        }
        self.keys.insert(key);
        self.peak = self.peak.max(self.keys.len());
        Admission::Admitted
    }

    /// Observe a completion. Returns false for keys this run never admitted.
    pub fn complete(&mut self, key: &ResourceKey) -> bool {
        self.keys.remove(key)
    }

    /// Whether `key` is in flight.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.keys.contains(key)
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.keys.len())
    }

    /// Keys in flight.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Maximum simultaneous size observed.
    pub const fn peak(&self) -> usize {
        self.peak
    }
}
