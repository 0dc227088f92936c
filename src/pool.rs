//! Slot pool for [`ResourceState`] instances.
//!
//! The pool recycles retired states to avoid an allocation per
//! registration. It provides no cross-thread visibility guarantees of its
//! own: a checked-out slot goes through the full construct-then-publish
//! sequence in [`crate::registry`] before any other thread can reach it.
//!
//! # Quiescence
//!
//! A retired slot may still be referenced by a worker holding an
//! [`EventRecord`](crate::demux::EventRecord) that raced retirement. The
//! pool therefore only hands out a slot whose `Arc` strong count has
//! dropped to the pool's own reference; until then the slot stays parked
//! in the free list. This is the reference-counting flavor of the
//! no-use-after-free rule: deallocation (reuse) waits for quiescence
//! instead of serializing against every dispatch.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::state::{Operation, ResourceState};
use crate::tracing_compat::trace;

/// Allocates and recycles [`ResourceState`] slots.
#[derive(Debug)]
pub struct ResourcePool {
    free: Mutex<Vec<Arc<ResourceState>>>,
    retain: usize,
}

impl ResourcePool {
    /// Creates a pool that keeps at most `retain` retired slots around.
    #[must_use]
    pub fn new(retain: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            retain,
        }
    }

    /// Checks out a slot for `descriptor`, fully re-initialized and in the
    /// `New` lifecycle.
    ///
    /// Prefers a quiescent recycled slot; falls back to a fresh
    /// allocation. Slots whose strong count shows outstanding references
    /// are left parked. Any operations found on a recycled slot (a retire
    /// path that failed to complete them) are returned alongside so the
    /// caller can fail them instead of losing them.
    pub fn checkout(&self, descriptor: RawFd) -> (Arc<ResourceState>, Vec<Operation>) {
        let mut free = self.free.lock();
        let mut idx = 0;
        while idx < free.len() {
            // Strong count of 1 means only the free list holds the slot;
            // no worker can still dereference it.
            if Arc::strong_count(&free[idx]) == 1 {
                let slot = free.swap_remove(idx);
                drop(free);
                let orphans = slot.reset(descriptor);
                trace!(descriptor, recycled = true, "pool checkout");
                return (slot, orphans);
            }
            idx += 1;
        }
        drop(free);
        trace!(descriptor, recycled = false, "pool checkout");
        (Arc::new(ResourceState::new(descriptor)), Vec::new())
    }

    /// Returns a retired slot to the free list.
    ///
    /// The slot is parked even if other references are still live; reuse
    /// is deferred until [`checkout`](Self::checkout) observes quiescence.
    /// Beyond the retain limit the slot is simply dropped (the last
    /// in-flight reference frees it).
    pub fn checkin(&self, slot: Arc<ResourceState>) {
        let mut free = self.free.lock();
        if free.len() < self.retain {
            free.push(slot);
        }
    }

    /// Number of parked slots (including not-yet-quiescent ones).
    #[must_use]
    pub fn parked(&self) -> usize {
        self.free.lock().len()
    }
}
