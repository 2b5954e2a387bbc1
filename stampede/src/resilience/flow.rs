//! Admission-control counter bounding concurrent protected executions.

use std::sync::atomic::{AtomicU32, Ordering};

/// Bounded in-flight counter.
///
/// [`try_acquire`](Self::try_acquire) increments and undoes the increment
/// when the bound is exceeded, so the observed in-flight count never passes
/// `max_inflight`. [`release`](Self::release) clamps at zero, so a stray
/// release can never drive the counter negative.
#[derive(Debug)]
pub struct FlowController {
    inflight: AtomicU32,
    max_inflight: u32,
}

impl FlowController {
    /// Creates a controller admitting at most `max_inflight` concurrent
    /// executions.
    pub fn new(max_inflight: u32) -> Self {
        Self {
            inflight: AtomicU32::new(0),
            max_inflight: max_inflight.max(1),
        }
    }

    /// Attempts to take one in-flight slot.
    pub fn try_acquire(&self) -> bool {
        let occupied = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
        if occupied > self.max_inflight {
            self.inflight.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Returns one in-flight slot.
    pub fn release(&self) {
        let _ = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Currently occupied slots.
    pub fn inflight(&self) -> u32 {
        self.inflight.load(Ordering::Acquire)
    }
}
