//! Round-robin target selection with a bounded retry budget.
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotating cursor over a target list. Selection is safe under concurrent
/// calls from multiple workers: each call advances the cursor atomically and
/// exactly once, wrapping modulo the target count.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Select the next index for a list of `len` targets.
    pub fn select(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        Some(count % len)
    }
}

/// Forwarding failures may be retried against the remaining targets; a group
/// with a single target never retries.
pub fn retry_budget(target_count: usize) -> usize {
    target_count.saturating_sub(1)
}
