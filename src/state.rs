//! Per-descriptor resource state and operation queues.
//!
//! A [`ResourceState`] holds everything the reactor tracks for one watched
//! descriptor: its lifecycle tag and three FIFO queues of pending
//! operations, all behind the state's own mutex. Instances are shared as
//! `Arc<ResourceState>`; the `Arc` strong count doubles as the reuse
//! reference count the pool consults before recycling a slot.
//!
//! # Lifecycle
//!
//! ```text
//! New ──publish──> Registered <──drain── Active ──retire──> Retired
//!                      └───────enqueue──────┘
//! ```
//!
//! Every transition is made while holding the state's lock except
//! `New -> Registered`, which happens before the object is reachable by
//! any other thread: during that window the constructing thread is the
//! sole owner, and the registry's publication discipline (see
//! [`crate::registry`]) is what hands the fully-built object across the
//! thread boundary.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::demux::Interest;
use crate::error::{Error, Result};

/// Process-wide operation id counter. Ids stay unique across descriptor
/// reuse, so a stale [`OperationHandle`](crate::scheduler::OperationHandle)
/// can never cancel a newer operation on a recycled slot.
static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

fn next_op_id() -> u64 {
    NEXT_OP_ID.fetch_add(1, Ordering::Relaxed)
}

/// Single-shot completion callback, invoked at most once per operation,
/// always outside any reactor lock.
pub type CompletionFn = Box<dyn FnOnce(Result<Interest>) + Send + 'static>;

/// A pending I/O operation queued on a [`ResourceState`].
pub struct Operation {
    id: u64,
    interest: Interest,
    complete: CompletionFn,
}

impl Operation {
    fn new(interest: Interest, complete: CompletionFn) -> Self {
        Self {
            id: next_op_id(),
            interest,
            complete,
        }
    }

    /// Returns the operation's unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the interest this operation waits for.
    #[must_use]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Consumes the operation, invoking its completion callback.
    pub fn complete(self, result: Result<Interest>) {
        (self.complete)(result);
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("interest", &self.interest)
            .finish_non_exhaustive()
    }
}

/// Lifecycle tag for a [`ResourceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Being constructed; not yet reachable by any other thread.
    New,
    /// Published and watched, no pending operations.
    Registered,
    /// Has pending or in-flight operations.
    Active,
    /// No further events delivered; queues drained or cancelled.
    Retired,
}

/// Mutable per-descriptor bookkeeping, guarded by the state's mutex.
#[derive(Debug)]
struct StateInner {
    descriptor: RawFd,
    lifecycle: Lifecycle,
    read: VecDeque<Operation>,
    write: VecDeque<Operation>,
    other: VecDeque<Operation>,
}

impl StateInner {
    fn queues_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.other.is_empty()
    }

    fn queue_for_mut(&mut self, interest: Interest) -> &mut VecDeque<Operation> {
        if interest.is_readable() {
            &mut self.read
        } else if interest.is_writable() {
            &mut self.write
        } else {
            &mut self.other
        }
    }
}

/// Per-descriptor state: one mutex guarding lifecycle and operation queues.
///
/// The registry lock never covers this state's contents; the state's own
/// lock never covers the registry map. See [`crate::registry`] for the
/// publication contract that lets a worker dereference an instance safely.
pub struct ResourceState {
    inner: Mutex<StateInner>,
}

impl ResourceState {
    /// Creates a fresh state for `descriptor` in the `New` lifecycle.
    #[must_use]
    pub fn new(descriptor: RawFd) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                descriptor,
                lifecycle: Lifecycle::New,
                read: VecDeque::new(),
                write: VecDeque::new(),
                other: VecDeque::new(),
            }),
        }
    }

    /// Re-runs full construction on a recycled slot.
    ///
    /// A recycled slot is exactly as unsafe to expose early as a fresh
    /// allocation, so this resets every field before the slot can be
    /// published again. Pending queues must already be empty; leftover
    /// operations would mean callbacks that silently never fire, so they
    /// are drained defensively into the returned vector for the caller to
    /// complete.
    pub fn reset(&self, descriptor: RawFd) -> Vec<Operation> {
        let mut inner = self.inner.lock();
        let mut orphans = Vec::new();
        orphans.extend(inner.read.drain(..));
        orphans.extend(inner.write.drain(..));
        orphans.extend(inner.other.drain(..));
        inner.descriptor = descriptor;
        inner.lifecycle = Lifecycle::New;
        orphans
    }

    /// Returns the descriptor this state currently tracks.
    #[must_use]
    pub fn descriptor(&self) -> RawFd {
        self.inner.lock().descriptor
    }

    /// Returns the current lifecycle tag.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    /// Transitions `New -> Registered` at the publication point.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the state is not `New`; a slot must go through
    /// [`reset`](Self::reset) before it can be republished.
    pub fn mark_registered(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.lifecycle {
            Lifecycle::New => {
                inner.lifecycle = Lifecycle::Registered;
                Ok(())
            }
            other => Err(Error::invalid_state(format!(
                "cannot publish state in lifecycle {other:?}"
            ))),
        }
    }

    /// Queues an operation waiting for `interest`, transitioning to
    /// `Active`.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the state is `Retired` (no further events will be
    /// delivered) or still `New` (not yet published; nothing should hold a
    /// reference able to enqueue).
    pub fn enqueue(&self, interest: Interest, complete: CompletionFn) -> Result<u64> {
        let mut inner = self.inner.lock();
        match inner.lifecycle {
            Lifecycle::Registered | Lifecycle::Active => {
                let op = Operation::new(interest, complete);
                let id = op.id();
                inner.queue_for_mut(interest).push_back(op);
                inner.lifecycle = Lifecycle::Active;
                Ok(id)
            }
            Lifecycle::Retired => Err(Error::invalid_state("descriptor retired")),
            Lifecycle::New => Err(Error::invalid_state("state not yet published")),
        }
    }

    /// Pops the operations made ready by `readiness`, in enqueue order per
    /// queue.
    ///
    /// Error or hang-up readiness drains every queue: all pending
    /// operations on the descriptor complete with that readiness. Returns
    /// an empty batch for a `Retired` state (the event raced retirement and
    /// the operations were already cancelled).
    pub fn pop_ready(&self, readiness: Interest) -> SmallVec<[Operation; 4]> {
        let mut inner = self.inner.lock();
        let mut batch = SmallVec::new();
        if inner.lifecycle == Lifecycle::Retired {
            return batch;
        }
        if readiness.is_error() || readiness.is_hup() {
            batch.extend(inner.read.drain(..));
            batch.extend(inner.write.drain(..));
            batch.extend(inner.other.drain(..));
        } else {
            if readiness.is_readable() {
                batch.extend(inner.read.drain(..));
            }
            if readiness.is_writable() {
                batch.extend(inner.write.drain(..));
            }
        }
        if inner.lifecycle == Lifecycle::Active && inner.queues_empty() {
            inner.lifecycle = Lifecycle::Registered;
        }
        batch
    }

    /// Removes a single pending operation by id.
    ///
    /// Returns `None` when no queued operation carries the id (already
    /// dispatched, already cancelled, or never existed).
    pub fn cancel_op(&self, id: u64) -> Option<Operation> {
        let mut inner = self.inner.lock();
        let op = remove_by_id(&mut inner.read, id)
            .or_else(|| remove_by_id(&mut inner.write, id))
            .or_else(|| remove_by_id(&mut inner.other, id));
        if inner.lifecycle == Lifecycle::Active && inner.queues_empty() {
            inner.lifecycle = Lifecycle::Registered;
        }
        op
    }

    /// Marks the state `Retired` and drains every pending operation.
    ///
    /// Idempotent: a second call finds the queues empty and returns an
    /// empty vector. The caller completes the returned operations (with a
    /// cancellation error) outside all locks.
    pub fn cancel_all(&self) -> Vec<Operation> {
        let mut inner = self.inner.lock();
        inner.lifecycle = Lifecycle::Retired;
        let mut cancelled = Vec::new();
        cancelled.extend(inner.read.drain(..));
        cancelled.extend(inner.write.drain(..));
        cancelled.extend(inner.other.drain(..));
        cancelled
    }

    /// Number of pending operations across all queues.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        let inner = self.inner.lock();
        inner.read.len() + inner.write.len() + inner.other.len()
    }
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResourceState")
            .field("descriptor", &inner.descriptor)
            .field("lifecycle", &inner.lifecycle)
            .field(
                "pending",
                &(inner.read.len() + inner.write.len() + inner.other.len()),
            )
            .finish()
    }
}

fn remove_by_id(queue: &mut VecDeque<Operation>, id: u64) -> Option<Operation> {
    let pos = queue.iter().position(|op| op.id() == id)?;
    queue.remove(pos)
}
