//! Outstanding-work accounting for the scheduler.
//!
//! Every pending operation, and every live [`WorkGuard`], contributes one
//! unit to the shared [`WorkCount`]. Worker loops in
//! [`Scheduler::run`](super::Scheduler::run) return when the count drains
//! to zero, so a guard is the way to keep `run` blocking while no I/O is
//! registered yet. When the count crosses zero the demultiplexer is
//! interrupted so blocked workers notice promptly rather than on their
//! next timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::demux::Demux;
use crate::tracing_compat::trace;

/// Shared outstanding-work counter.
pub(crate) struct WorkCount {
    outstanding: AtomicUsize,
    demux: Arc<dyn Demux>,
}

impl WorkCount {
    pub(crate) fn new(demux: Arc<dyn Demux>) -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicUsize::new(0),
            demux,
        })
    }

    /// Adds one unit of outstanding work.
    pub(crate) fn acquire_one(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Removes one unit; on the zero crossing, wakes blocked workers so
    /// idle `run` calls can return.
    pub(crate) fn release_one(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "work count underflow");
        if prev == 1 {
            trace!("outstanding work drained");
            self.demux.interrupt();
        }
    }

    /// Current outstanding-work count.
    pub(crate) fn count(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkCount")
            .field("outstanding", &self.count())
            .finish_non_exhaustive()
    }
}

/// Keeps the scheduler's `run` call blocking while held.
///
/// Dropping the guard releases its work unit; [`release`](Self::release)
/// does the same explicitly. Cloning acquires an additional unit.
#[derive(Debug)]
pub struct WorkGuard {
    work: Arc<WorkCount>,
    released: bool,
}

impl WorkGuard {
    pub(crate) fn new(work: Arc<WorkCount>) -> Self {
        work.acquire_one();
        Self {
            work,
            released: false,
        }
    }

    /// Releases the guard's work unit.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.work.release_one();
        }
    }
}

impl Clone for WorkGuard {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.work))
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
