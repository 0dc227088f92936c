//! Event demultiplexer abstraction.
//!
//! A [`Demux`] wraps the kernel readiness-notification mechanism. Each
//! watched descriptor is associated with its `Arc<ResourceState>` inside
//! the backend's registration map, so a later [`Demux::wait`] hands the
//! state back to the worker without a registry lookup. The registration
//! map's mutex is one of the two designated publication points for a newly
//! constructed state (the other is the registry map; see
//! [`crate::registry`]): inserting under the mutex releases, cloning out
//! under the mutex acquires.
//!
//! # Delivery contract
//!
//! - `wait` returning zero events (timeout, interrupt, spurious wake) is
//!   normal; callers loop.
//! - A single ready event is delivered to exactly one `wait` call even
//!   with multiple concurrent waiters.
//! - `interrupt` is callable from any thread and wakes an in-progress
//!   `wait` promptly through a platform wake mechanism, not a timeout.

pub mod interest;
pub mod lab;
pub mod poll;

pub use interest::Interest;
pub use lab::LabDemux;
pub use poll::PollDemux;

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::state::ResourceState;

/// An I/O object whose descriptor can be watched.
///
/// Any `AsRawFd + Send + Sync` type implements this through the blanket
/// impl. Implementors guarantee the descriptor stays valid for the
/// duration of its registration and supports non-blocking operations.
pub trait Source: std::os::unix::io::AsRawFd + Send + Sync {}

impl<T: std::os::unix::io::AsRawFd + Send + Sync> Source for T {}

/// Readiness event for one watched descriptor, produced by one
/// [`Demux::wait`] call and never persisted.
#[derive(Clone)]
pub struct EventRecord {
    /// The ready descriptor.
    pub descriptor: RawFd,
    /// The readiness that fired.
    pub readiness: Interest,
    /// The state associated at watch time; guaranteed fully constructed
    /// by the publication discipline.
    pub state: Arc<ResourceState>,
}

impl std::fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecord")
            .field("descriptor", &self.descriptor)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

/// Buffer for events collected by one wait call.
#[derive(Debug, Default)]
pub struct Events {
    inner: Vec<EventRecord>,
    capacity: usize,
}

impl Events {
    /// Creates a new events buffer with capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Clears the buffer.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum batch size per wait call.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over events.
    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.inner.iter()
    }

    /// Drains the collected events.
    pub fn drain(&mut self) -> std::vec::Drain<'_, EventRecord> {
        self.inner.drain(..)
    }

    pub(crate) fn push(&mut self, record: EventRecord) {
        self.inner.push(record);
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a EventRecord;
    type IntoIter = std::slice::Iter<'a, EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Trait for an event demultiplexer backend.
pub trait Demux: Send + Sync {
    /// Registers or widens interest for a descriptor, associating `state`
    /// so `wait` can return it without a registry lookup.
    ///
    /// Upsert semantics: watching an already-watched descriptor unions the
    /// interest and keeps the original state association, unless the
    /// associated state has been retired, in which case the entry is
    /// rebound to the new state and interest.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the kernel table is full,
    /// `InvalidDescriptor` if the descriptor is not valid,
    /// `InvalidState` if `state` is already retired or the backend cannot
    /// deliver the requested interest (the OS backend reports only
    /// read/write readiness, so interest must include at least one).
    fn watch(&self, descriptor: RawFd, interest: Interest, state: Arc<ResourceState>)
        -> Result<()>;

    /// Replaces the kernel interest for a watched descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the descriptor is not watched.
    fn modify(&self, descriptor: RawFd, interest: Interest) -> Result<()>;

    /// Stops watching a descriptor and drops its state association.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the descriptor is not watched.
    fn unwatch(&self, descriptor: RawFd) -> Result<()>;

    /// Blocks until at least one watched descriptor is ready, the timeout
    /// elapses, or [`interrupt`](Self::interrupt) fires. Returns the
    /// number of events collected; zero is not an error.
    ///
    /// # Errors
    ///
    /// Propagates kernel wait failures other than interruption; such a
    /// failure is fatal for the calling worker.
    fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize>;

    /// Wakes any in-progress `wait` from another thread. Sticky: an
    /// interrupt with no waiter wakes the next wait instead.
    fn interrupt(&self);

    /// Number of watched descriptors.
    fn watch_count(&self) -> usize;

    /// Returns true when nothing is watched.
    fn is_empty(&self) -> bool {
        self.watch_count() == 0
    }
}
