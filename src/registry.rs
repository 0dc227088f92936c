//! Descriptor registry and the construct-then-publish contract.
//!
//! The registry owns the descriptor -> [`ResourceState`] mapping behind a
//! single coarse lock. That lock protects the *structure* of the map
//! (insert/remove/lookup) and nothing else: it never guards the contents
//! of a state, and a state's own lock never guards the map.
//!
//! # Publication discipline
//!
//! The invariant every consumer relies on: **if a mapping entry is visible
//! to a thread, the state it points to is fully constructed**, including
//! its mutex and queues. This is enforced by sequencing, not by luck:
//!
//! 1. The slot is obtained from the pool and every field initialized
//!    (descriptor, lifecycle, queues) while the constructing thread is the
//!    sole owner. No other thread can reach the object yet, so no lock is
//!    needed and none would help.
//! 2. Only after construction completes is the reference made reachable,
//!    through exactly two designated handoffs, each with its own
//!    acquire/release pairing:
//!    - insertion into this registry's map (the map mutex unlock is the
//!      release; `lookup` re-acquires through the same mutex), and
//!    - the clone handed to [`Demux::watch`](crate::demux::Demux::watch),
//!      which parks it in the backend's registration map under that map's
//!      own mutex.
//!
//! A handoff that merely happens to run while some unrelated mutex is held
//! does not count; each publication path above names the mutex that
//! carries its ordering.
//!
//! # Retirement
//!
//! `retire` removes the mapping under the registry lock, cancels all
//! pending operations, and parks the slot in the pool. The pool defers
//! reuse until the `Arc` strong count shows no worker can still be
//! dereferencing a stale reference (see [`crate::pool`]).

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pool::ResourcePool;
use crate::state::{Operation, ResourceState};
use crate::tracing_compat::{debug, trace};

/// Descriptor -> state registry with the publication contract.
#[derive(Debug)]
pub struct Registry {
    entries: Mutex<HashMap<RawFd, Arc<ResourceState>>>,
    pool: ResourcePool,
}

impl Registry {
    /// Creates a registry whose pool retains at most `pool_retain` slots.
    #[must_use]
    pub fn new(pool_retain: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            pool: ResourcePool::new(pool_retain),
        }
    }

    /// Constructs a state for `descriptor` and publishes it.
    ///
    /// The returned state is `Registered` and reachable via
    /// [`lookup`](Self::lookup). Construction (including the recycled-slot
    /// reset) finishes before the insertion that makes the reference
    /// reachable; the map mutex carries the release.
    ///
    /// Also returns any orphaned operations found on a recycled slot so
    /// the caller can fail them outside all locks (an empty vector in
    /// every correct retire path).
    ///
    /// # Errors
    ///
    /// `InvalidState` if the descriptor is already registered; the slot
    /// goes back to the pool and nothing is published.
    pub fn allocate_and_publish(
        &self,
        descriptor: RawFd,
    ) -> Result<(Arc<ResourceState>, Vec<Operation>)> {
        // Construction happens before taking the registry lock: the slot
        // is unreachable, so holding the lock here would order nothing.
        let (state, orphans) = self.pool.checkout(descriptor);
        state.mark_registered()?;

        let mut entries = self.entries.lock();
        if entries.contains_key(&descriptor) {
            drop(entries);
            state.cancel_all();
            self.pool.checkin(state);
            return Err(Error::invalid_state(format!(
                "descriptor {descriptor} already registered"
            )));
        }
        // Publication point: the unlock after this insert is the release
        // paired with the acquire in every lookup.
        entries.insert(descriptor, Arc::clone(&state));
        drop(entries);

        trace!(descriptor, "state published");
        Ok((state, orphans))
    }

    /// Looks up the state for a descriptor.
    ///
    /// Acquires through the registry lock, so a `Some` result is fully
    /// constructed by the publication invariant.
    #[must_use]
    pub fn lookup(&self, descriptor: RawFd) -> Option<Arc<ResourceState>> {
        self.entries.lock().get(&descriptor).cloned()
    }

    /// Retires a descriptor: removes the mapping, cancels all pending
    /// operations, parks the slot for recycling.
    ///
    /// Returns the cancelled operations; the caller completes them (with a
    /// cancellation error) outside all locks. A worker mid-dispatch for
    /// this descriptor still holds its own `Arc` clone, so the state
    /// outlives the removal; the pool will not reuse the slot until that
    /// reference drops.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the descriptor is not registered — which
    /// makes a second retire a deterministic error, never a double free.
    pub fn retire(&self, descriptor: RawFd) -> Result<Vec<Operation>> {
        let state = self
            .entries
            .lock()
            .remove(&descriptor)
            .ok_or_else(|| {
                Error::invalid_descriptor(format!("descriptor {descriptor} not registered"))
            })?;

        let cancelled = state.cancel_all();
        self.pool.checkin(state);
        debug!(descriptor, cancelled = cancelled.len(), "descriptor retired");
        Ok(cancelled)
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
