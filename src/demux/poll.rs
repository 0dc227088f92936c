//! OS-backed demultiplexer over the `polling` crate.
//!
//! [`PollDemux`] wraps a [`polling::Poller`] (epoll on Linux, kqueue on
//! macOS/BSD) and keeps a registration map associating each watched
//! descriptor with its `Arc<ResourceState>`. The map mutex is the
//! demultiplexer-side publication point: the state is parked under it at
//! watch time and cloned out under it at event delivery.
//!
//! # Safety
//!
//! This module uses `unsafe` only to construct a `BorrowedFd` from the
//! raw descriptor stored at watch time. The compiler cannot verify that
//! descriptors remain valid for the duration of their registration; the
//! caller owns the descriptor and must keep it open until `unwatch`.
//!
//! # Exactly-once delivery
//!
//! Registrations are oneshot (the `polling` crate disarms an entry once
//! it fires) and kernel waits are serialized through an internal poll
//! lock, so a single readiness event reaches exactly one `wait` call even
//! with several worker threads blocked on the same demultiplexer. Each
//! delivered event is re-armed with its stored interest before `wait`
//! returns, opening the next readiness epoch.
//!
//! # Interest restrictions
//!
//! The kernel facility reports only read/write readiness, so a watch
//! whose interest covers neither is rejected up front with
//! `InvalidState`: error and hang-up conditions surface as read/write
//! readiness on the descriptor, never as standalone events.
//!
//! # Thread Safety
//!
//! `PollDemux` is `Send + Sync` and shared across threads via `Arc`.
//! `interrupt()` uses the poller's built-in notify mechanism, which is
//! sticky: a notify with no waiter wakes the next wait instead of being
//! lost.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use polling::{Event as PollEvent, Poller};

use super::{Demux, EventRecord, Events, Interest};
use crate::error::{Error, Result};
use crate::state::{Lifecycle, ResourceState};
use crate::tracing_compat::trace;

/// Registration state for a watched descriptor.
struct WatchInfo {
    /// The current interest flags (used for oneshot re-arm).
    interest: Interest,
    /// The state handed back on event delivery.
    state: Arc<ResourceState>,
}

impl std::fmt::Debug for WatchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchInfo")
            .field("interest", &self.interest)
            .finish_non_exhaustive()
    }
}

/// OS demultiplexer backend (epoll/kqueue via the `polling` crate).
pub struct PollDemux {
    /// The polling instance.
    poller: Poller,
    /// Maps descriptors to their registration info.
    watches: Mutex<HashMap<RawFd, WatchInfo>>,
    /// Serializes kernel waiters and holds the reusable scratch buffer.
    /// Only one thread sits in the kernel wait at a time; the others block
    /// here and take their turn when the holder returns.
    poll_lock: Mutex<Vec<PollEvent>>,
}

impl PollDemux {
    /// Creates a new demultiplexer.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying poller cannot be created (e.g.
    /// out of file descriptors).
    pub fn new() -> Result<Self> {
        let poller = Poller::new().map_err(Error::from)?;
        Ok(Self {
            poller,
            watches: Mutex::new(HashMap::new()),
            poll_lock: Mutex::new(Vec::new()),
        })
    }

    /// Converts our interest flags to the polling crate's event.
    fn interest_to_poll_event(descriptor: RawFd, interest: Interest) -> PollEvent {
        let key = descriptor as usize;
        match (interest.is_readable(), interest.is_writable()) {
            (true, true) => PollEvent::all(key),
            (true, false) => PollEvent::readable(key),
            (false, true) => PollEvent::writable(key),
            (false, false) => PollEvent::none(key),
        }
    }

    /// Converts a polling event to our readiness flags.
    fn poll_event_to_readiness(event: &PollEvent) -> Interest {
        let mut readiness = Interest::NONE;
        if event.readable {
            readiness = readiness.add(Interest::READABLE);
        }
        if event.writable {
            readiness = readiness.add(Interest::WRITABLE);
        }
        readiness
    }
}

impl Demux for PollDemux {
    fn watch(
        &self,
        descriptor: RawFd,
        interest: Interest,
        state: Arc<ResourceState>,
    ) -> Result<()> {
        // The kernel facility only reports read/write readiness; an
        // error/hang-up-only watch could never fire and its operations
        // would never drain. Rejecting here leaves no partial state.
        if !interest.intersects(Interest::both()) {
            return Err(Error::invalid_state(
                "interest must include readable or writable",
            ));
        }
        if state.lifecycle() == Lifecycle::Retired {
            return Err(Error::invalid_state("cannot watch a retired state"));
        }
        let mut watches = self.watches.lock();
        if let Some(info) = watches.get_mut(&descriptor) {
            if info.state.lifecycle() == Lifecycle::Retired {
                // Stale association left by a retirement that raced a
                // re-registration; rebind rather than widen.
                let event = Self::interest_to_poll_event(descriptor, interest);
                self.poller.modify(descriptor, event).map_err(Error::from)?;
                info.interest = interest;
                info.state = state;
                trace!(descriptor, %interest, "stale watch rebound");
                return Ok(());
            }
            // Upsert: widen the kernel interest, keep the original state
            // association.
            let merged = info.interest.add(interest);
            let event = Self::interest_to_poll_event(descriptor, merged);
            self.poller.modify(descriptor, event).map_err(Error::from)?;
            info.interest = merged;
            return Ok(());
        }

        let event = Self::interest_to_poll_event(descriptor, interest);
        self.poller.add(descriptor, event).map_err(Error::from)?;

        // Publication handoff: the state becomes reachable to waiting
        // workers through this map; the mutex carries the release.
        watches.insert(descriptor, WatchInfo { interest, state });
        trace!(descriptor, %interest, "descriptor watched");
        Ok(())
    }

    fn modify(&self, descriptor: RawFd, interest: Interest) -> Result<()> {
        if !interest.intersects(Interest::both()) {
            return Err(Error::invalid_state(
                "interest must include readable or writable",
            ));
        }
        let mut watches = self.watches.lock();
        let info = watches.get_mut(&descriptor).ok_or_else(|| {
            Error::invalid_descriptor(format!("descriptor {descriptor} not watched"))
        })?;

        let event = Self::interest_to_poll_event(descriptor, interest);
        self.poller.modify(descriptor, event).map_err(Error::from)?;
        info.interest = interest;
        Ok(())
    }

    fn unwatch(&self, descriptor: RawFd) -> Result<()> {
        let mut watches = self.watches.lock();
        watches.remove(&descriptor).ok_or_else(|| {
            Error::invalid_descriptor(format!("descriptor {descriptor} not watched"))
        })?;
        drop(watches);

        self.poller.delete(descriptor).map_err(Error::from)?;
        trace!(descriptor, "descriptor unwatched");
        Ok(())
    }

    fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        events.clear();

        let mut scratch = self.poll_lock.lock();
        scratch.clear();

        match self.poller.wait(&mut scratch, timeout) {
            Ok(_) => {}
            // Interrupted wake: not an error, the caller loops.
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(Error::from(err)),
        }

        let watches = self.watches.lock();
        for poll_event in scratch.iter() {
            let descriptor = poll_event.key as RawFd;
            // An event can race unwatch/retire; with the entry gone there
            // is no state to deliver to, so the event is dropped.
            let Some(info) = watches.get(&descriptor) else {
                continue;
            };
            let readiness = Self::poll_event_to_readiness(poll_event);
            if readiness.is_empty() {
                continue;
            }
            events.push(EventRecord {
                descriptor,
                readiness,
                // Consumption point: acquired through the watches mutex,
                // so the state is fully constructed.
                state: Arc::clone(&info.state),
            });

            // Oneshot re-arm with the stored interest; this opens the
            // next readiness epoch for the descriptor.
            let event = Self::interest_to_poll_event(descriptor, info.interest);
            if let Err(err) = self.poller.modify(descriptor, event) {
                trace!(descriptor, error = %err, "oneshot re-arm failed");
            }
        }

        Ok(events.len())
    }

    fn interrupt(&self) {
        // Built-in notify; errors here mean the poller is gone, and the
        // worker will notice on its next wait.
        let _ = self.poller.notify();
    }

    fn watch_count(&self) -> usize {
        self.watches.lock().len()
    }
}

impl std::fmt::Debug for PollDemux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollDemux")
            .field("watch_count", &self.watch_count())
            .finish_non_exhaustive()
    }
}
