//! Daemon-wide budget for upload buffers that do not fit a connection pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

/// Bytes of heap memory all connections of a daemon may hold for spilled uploads.
#[derive(Debug)]
pub(crate) struct LargeBudget {
    limit: usize,
    used: AtomicUsize,
}

impl LargeBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: AtomicUsize::new(0) }
    }

    /// Reserves `size` bytes, `false` when the budget is exhausted.
    pub fn reserve(&self, size: usize) -> bool {
        let reserved = self.used.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
            used.checked_add(size).filter(|total| *total <= self.limit)
        });
        trace!(size, ok = reserved.is_ok(), "large buffer reservation");
        reserved.is_ok()
    }

    pub fn release(&self, size: usize) {
        let _ = self.used.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| Some(used.saturating_sub(size)));
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

/// A heap buffer charged to a [`LargeBudget`].
///
/// The owner must give the reservation back with [`LargeBuffer::release`].
#[derive(Debug, Default)]
pub(crate) struct LargeBuffer {
    pub data: Vec<u8>,
    reserved: usize,
}

impl LargeBuffer {
    /// Makes room for `additional` more bytes, growing the reservation geometrically up to `max`.
    pub fn ensure_capacity(&mut self, budget: &LargeBudget, additional: usize, max: usize) -> bool {
        let Some(needed) = self.data.len().checked_add(additional) else {
            return false;
        };
        if needed <= self.reserved {
            return true;
        }
        if needed > max {
            return false;
        }
        let target = needed.max(self.reserved.saturating_mul(2)).min(max);
        if !budget.reserve(target - self.reserved) {
            return false;
        }
        self.data.reserve_exact(target - self.data.len());
        self.reserved = target;
        true
    }

    pub fn release(&mut self, budget: &LargeBudget) {
        budget.release(self.reserved);
        self.reserved = 0;
        self.data = Vec::new();
    }
}
