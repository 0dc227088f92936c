//! Scheduler: the wait/dispatch loop and the public operation API.
//!
//! A [`Scheduler`] ties a [`Demux`] backend and a [`Registry`] together.
//! Any number of worker threads call [`run`](Scheduler::run) against the
//! same instance; any other thread (the owning thread) may call
//! [`register`](Scheduler::register), [`cancel`](Scheduler::cancel), or
//! [`retire`](Scheduler::retire) at arbitrary times relative to worker
//! execution, with no requirement that workers be paused.
//!
//! # Loop shape
//!
//! Each turn: wait for readiness, then for every event lock the
//! associated state, pop the ready operations, unlock, and invoke the
//! completion callbacks *outside* the lock — a callback that re-registers
//! or cancels on the same descriptor must not deadlock against the lock
//! its own dispatch is holding.
//!
//! # Termination
//!
//! `run` returns when the stop flag is observed or when the
//! outstanding-work count (pending operations plus live
//! [`WorkGuard`]s) drains to zero. A worker that observes stop chains one
//! more interrupt before returning so every other blocked worker
//! unblocks in turn.

pub mod work;

pub use work::WorkGuard;
pub(crate) use work::WorkCount;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::demux::{Demux, EventRecord, Events, Interest, PollDemux, Source};
use crate::error::{Error, ErrorKind, Result};
use crate::registry::Registry;
use crate::state::{CompletionFn, Lifecycle};
use crate::tracing_compat::{debug, error, trace};

/// Names one pending operation for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    descriptor: RawFd,
    id: u64,
}

impl OperationHandle {
    /// The descriptor the operation was registered against.
    #[must_use]
    pub const fn descriptor(&self) -> RawFd {
        self.descriptor
    }

    /// The operation's unique id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Multi-threaded wait/dispatch scheduler.
pub struct Scheduler {
    demux: Arc<dyn Demux>,
    registry: Arc<Registry>,
    work: Arc<WorkCount>,
    stopped: AtomicBool,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler over the given demultiplexer backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(demux: Arc<dyn Demux>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let work = WorkCount::new(Arc::clone(&demux));
        Ok(Self {
            registry: Arc::new(Registry::new(config.pool_retain)),
            demux,
            work,
            stopped: AtomicBool::new(false),
            config,
        })
    }

    /// Creates a scheduler over the OS demultiplexer ([`PollDemux`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the poller cannot be created or the
    /// configuration fails validation.
    pub fn with_os_demux(config: SchedulerConfig) -> Result<Self> {
        let demux: Arc<dyn Demux> = Arc::new(PollDemux::new()?);
        Self::new(demux, config)
    }

    /// The demultiplexer this scheduler drives.
    #[must_use]
    pub fn demux(&self) -> &Arc<dyn Demux> {
        &self.demux
    }

    /// The descriptor registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Current outstanding-work count.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.work.count()
    }

    /// Returns true once [`stop`](Self::stop) has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Acquires a guard that keeps `run` from returning while held.
    #[must_use]
    pub fn work_guard(&self) -> WorkGuard {
        WorkGuard::new(Arc::clone(&self.work))
    }

    /// Registers interest on a source and queues a single-shot completion.
    ///
    /// First sight of a descriptor allocates and publishes its state and
    /// watches it; later registrations widen the watch. The callback is
    /// invoked exactly once: with the readiness that fired, or with
    /// `Cancelled` if the operation is cancelled or the descriptor
    /// retired. A blocked worker is interrupted so the new watch takes
    /// effect immediately.
    ///
    /// # Errors
    ///
    /// `Shutdown` after [`stop`](Self::stop); `ResourceExhausted`,
    /// `InvalidDescriptor`, or `InvalidState` from the demultiplexer
    /// (for interest it cannot deliver), in which case no
    /// partially-registered state is left reachable.
    pub fn register(
        &self,
        source: &dyn Source,
        interest: Interest,
        complete: CompletionFn,
    ) -> Result<OperationHandle> {
        if self.is_stopped() {
            return Err(Error::new(ErrorKind::Shutdown));
        }
        let descriptor = source.as_raw_fd();

        let state = loop {
            if let Some(state) = self.registry.lookup(descriptor) {
                // Known descriptor: widen the existing watch.
                match self.demux.watch(descriptor, interest, Arc::clone(&state)) {
                    Ok(()) => break state,
                    // Lost the race to a retire between lookup and watch;
                    // the entry is gone, so take the publish path.
                    Err(_) if state.lifecycle() == Lifecycle::Retired => continue,
                    Err(err) => return Err(err),
                }
            }
            match self.registry.allocate_and_publish(descriptor) {
                Ok((state, orphans)) => {
                    // Orphans only exist if a retire path failed to
                    // complete its cancellations; fail them rather than
                    // losing them.
                    for op in orphans {
                        op.complete(Err(Error::cancelled()));
                    }
                    if let Err(err) =
                        self.demux.watch(descriptor, interest, Arc::clone(&state))
                    {
                        // Unpublish so no partial registration survives. A
                        // concurrent register may already have found the
                        // published state and enqueued; those operations
                        // still get their single completion.
                        if let Ok(cancelled) = self.registry.retire(descriptor) {
                            for op in cancelled {
                                op.complete(Err(Error::cancelled()));
                                self.work.release_one();
                            }
                        }
                        return Err(err);
                    }
                    break state;
                }
                // Lost the publication race to a concurrent register on
                // the same descriptor; take the lookup path.
                Err(err) if err.kind() == ErrorKind::InvalidState => continue,
                Err(err) => return Err(err),
            }
        };

        // The unit goes on the books before the operation becomes
        // dispatchable: a worker can pop and complete it the instant the
        // state mutex is released inside enqueue, and its release_one
        // must find the matching acquire.
        self.work.acquire_one();
        let id = match state.enqueue(interest, complete) {
            Ok(id) => id,
            Err(err) => {
                self.work.release_one();
                return Err(err);
            }
        };
        // A worker blocked in wait() predates this registration; wake it
        // so the readiness for this descriptor is not lost.
        self.demux.interrupt();
        trace!(descriptor, op = id, %interest, "operation registered");
        Ok(OperationHandle { descriptor, id })
    }

    /// Cancels one pending operation; its callback completes with
    /// `Cancelled`, outside any lock.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the descriptor is no longer registered,
    /// `InvalidState` if the operation already completed or was already
    /// cancelled.
    pub fn cancel(&self, handle: OperationHandle) -> Result<()> {
        let state = self.registry.lookup(handle.descriptor).ok_or_else(|| {
            Error::invalid_descriptor(format!(
                "descriptor {} not registered",
                handle.descriptor
            ))
        })?;
        let op = state.cancel_op(handle.id).ok_or_else(|| {
            Error::invalid_state(format!("operation {} is not pending", handle.id))
        })?;
        op.complete(Err(Error::cancelled()));
        self.work.release_one();
        Ok(())
    }

    /// Retires a descriptor: unwatches it, removes it from the registry,
    /// and completes every pending operation with `Cancelled` outside all
    /// locks.
    ///
    /// A worker mid-dispatch for the descriptor holds its own state
    /// reference; the slot is not reused until that reference drops.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the descriptor is not registered; calling
    /// retire twice yields this deterministically.
    pub fn retire(&self, descriptor: RawFd) -> Result<()> {
        match self.demux.unwatch(descriptor) {
            Ok(()) => {}
            // Registry state may exist without a watch if the original
            // watch call failed; retirement still proceeds.
            Err(err) if err.kind() == ErrorKind::InvalidDescriptor => {}
            Err(err) => return Err(err),
        }
        let cancelled = self.registry.retire(descriptor)?;
        for op in cancelled {
            op.complete(Err(Error::cancelled()));
            self.work.release_one();
        }
        Ok(())
    }

    /// Runs the wait/dispatch loop on the calling thread.
    ///
    /// Callable from any number of threads concurrently. Returns the
    /// number of completions this worker dispatched, once stop is
    /// observed or outstanding work drains to zero.
    ///
    /// # Errors
    ///
    /// A kernel wait failure other than interruption is fatal: the error
    /// is logged, the scheduler transitions to stopped (waking all other
    /// workers), and the error is returned from this worker's `run`.
    pub fn run(&self) -> Result<usize> {
        let mut events = Events::with_capacity(self.config.events_capacity);
        let mut dispatched = 0usize;

        loop {
            if self.is_stopped() {
                // Pass the wakeup on so every blocked worker unblocks.
                self.demux.interrupt();
                break;
            }
            if self.work.count() == 0 {
                self.demux.interrupt();
                break;
            }

            match self.demux.wait(&mut events, Some(self.config.poll_timeout)) {
                // Zero events (timeout, interrupt, spurious) is a normal
                // turn; loop and re-check the exit conditions.
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "kernel wait failed, stopping scheduler");
                    self.stop();
                    return Err(err);
                }
            }

            for record in events.drain() {
                dispatched += dispatch(&self.work, &record);
            }
        }

        debug!(dispatched, "worker loop exited");
        Ok(dispatched)
    }

    /// Requests stop: idempotent, irreversible for this instance.
    ///
    /// Workers finish their current event batch and return; blocked
    /// workers are interrupted.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("stop requested");
            self.demux.interrupt();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("outstanding", &self.work.count())
            .field("stopped", &self.is_stopped())
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Dispatches one event record: pop under the state's lock, complete
/// outside it.
fn dispatch(work: &WorkCount, record: &EventRecord) -> usize {
    let batch = record.state.pop_ready(record.readiness);
    let count = batch.len();
    for op in batch {
        op.complete(Ok(record.readiness));
        work.release_one();
    }
    if count > 0 {
        trace!(
            descriptor = record.descriptor,
            completions = count,
            readiness = %record.readiness,
            "dispatched"
        );
    }
    count
}
