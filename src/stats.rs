use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{Action, ACTION_CARDINALITY};

/// Lock-free per-action ingest counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention on the ingest path.
pub struct ActionStats {
    counts: [AtomicU64; ACTION_CARDINALITY],
}

impl ActionStats {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Increment the counter for the given action by one.
    pub fn record(&self, action: Action) {
        if let Some(counter) = self.counts.get(action as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Atomically read and reset all counters, returning only non-zero
    /// entries in declaration order.
    pub fn snapshot(&self) -> Vec<(Action, u64)> {
        let mut result = Vec::new();

        for action in Action::all() {
            let count = self.counts[*action as usize].swap(0, Ordering::Relaxed);
            if count > 0 {
                result.push((*action, count));
            }
        }

        result
    }
}

impl Default for ActionStats {
    fn default() -> Self {
        Self::new()
    }
}
