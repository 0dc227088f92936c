//! Deterministic lab demultiplexer.
//!
//! [`LabDemux`] provides a controllable, deterministic event source for
//! testing registration, dispatch, and shutdown without relying on
//! OS-level facilities. Tests inject readiness for a descriptor and a
//! blocked [`wait`](super::Demux::wait) observes it exactly once.
//!
//! Injected events for descriptors that are not watched (or whose watch
//! interest does not cover them) are discarded at delivery time, matching
//! the OS backend's behavior for raced retirement.

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Demux, EventRecord, Events, Interest};
use crate::error::{Error, Result};
use crate::state::{Lifecycle, ResourceState};

struct WatchInfo {
    interest: Interest,
    state: Arc<ResourceState>,
}

struct LabState {
    watches: HashMap<RawFd, WatchInfo>,
    pending: VecDeque<(RawFd, Interest)>,
    /// Pending interrupt permits; each wakes one wait.
    interrupts: usize,
}

/// Deterministic demultiplexer for tests.
pub struct LabDemux {
    inner: Mutex<LabState>,
    cond: Condvar,
}

impl LabDemux {
    /// Creates an empty lab demultiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LabState {
                watches: HashMap::new(),
                pending: VecDeque::new(),
                interrupts: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Injects readiness for a descriptor and wakes waiters.
    pub fn inject(&self, descriptor: RawFd, readiness: Interest) {
        let mut inner = self.inner.lock();
        inner.pending.push_back((descriptor, readiness));
        drop(inner);
        self.cond.notify_all();
    }

    /// Injects read readiness.
    pub fn inject_readable(&self, descriptor: RawFd) {
        self.inject(descriptor, Interest::READABLE);
    }

    /// Injects write readiness.
    pub fn inject_writable(&self, descriptor: RawFd) {
        self.inject(descriptor, Interest::WRITABLE);
    }

    /// Injects an error condition.
    pub fn inject_error(&self, descriptor: RawFd) {
        self.inject(descriptor, Interest::ERROR);
    }

    /// Injects a peer hang-up.
    pub fn inject_hangup(&self, descriptor: RawFd) {
        self.inject(descriptor, Interest::HUP);
    }

    /// Number of injected events not yet delivered.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn delivers(watch: &WatchInfo, readiness: Interest) -> bool {
        // Errors and hangups always deliver; otherwise the watch interest
        // must cover the readiness.
        readiness.is_error() || readiness.is_hup() || watch.interest.intersects(readiness)
    }
}

impl Default for LabDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl Demux for LabDemux {
    fn watch(
        &self,
        descriptor: RawFd,
        interest: Interest,
        state: Arc<ResourceState>,
    ) -> Result<()> {
        if interest.is_empty() {
            return Err(Error::invalid_state("interest cannot be empty"));
        }
        if state.lifecycle() == Lifecycle::Retired {
            return Err(Error::invalid_state("cannot watch a retired state"));
        }
        let mut inner = self.inner.lock();
        if let Some(info) = inner.watches.get_mut(&descriptor) {
            if info.state.lifecycle() == Lifecycle::Retired {
                // Stale association from a raced retirement; rebind.
                info.interest = interest;
                info.state = state;
                return Ok(());
            }
            info.interest = info.interest.add(interest);
            return Ok(());
        }
        inner
            .watches
            .insert(descriptor, WatchInfo { interest, state });
        Ok(())
    }

    fn modify(&self, descriptor: RawFd, interest: Interest) -> Result<()> {
        let mut inner = self.inner.lock();
        let info = inner.watches.get_mut(&descriptor).ok_or_else(|| {
            Error::invalid_descriptor(format!("descriptor {descriptor} not watched"))
        })?;
        info.interest = interest;
        Ok(())
    }

    fn unwatch(&self, descriptor: RawFd) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.watches.remove(&descriptor).ok_or_else(|| {
            Error::invalid_descriptor(format!("descriptor {descriptor} not watched"))
        })?;
        Ok(())
    }

    fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        events.clear();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        loop {
            // Drain deliverable pending events under the lock; concurrent
            // waiters race for the lock, so each event reaches exactly one.
            while events.len() < events.capacity() {
                let Some((descriptor, readiness)) = inner.pending.pop_front() else {
                    break;
                };
                let Some(watch) = inner.watches.get(&descriptor) else {
                    continue;
                };
                if !Self::delivers(watch, readiness) {
                    continue;
                }
                events.push(EventRecord {
                    descriptor,
                    readiness,
                    state: Arc::clone(&watch.state),
                });
            }
            if !events.is_empty() {
                return Ok(events.len());
            }

            if inner.interrupts > 0 {
                inner.interrupts -= 1;
                return Ok(0);
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(0);
                    }
                    if self
                        .cond
                        .wait_for(&mut inner, deadline - now)
                        .timed_out()
                    {
                        // Re-check once; an injection may have raced the
                        // timeout.
                        continue;
                    }
                }
                None => self.cond.wait(&mut inner),
            }
        }
    }

    fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupts += 1;
        drop(inner);
        self.cond.notify_all();
    }

    fn watch_count(&self) -> usize {
        self.inner.lock().watches.len()
    }
}

impl std::fmt::Debug for LabDemux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LabDemux")
            .field("watch_count", &inner.watches.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}
