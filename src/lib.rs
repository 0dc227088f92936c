//! remux: a multi-threaded readiness scheduler with safe cross-thread
//! publication of per-descriptor state.
//!
//! The crate is organized around three pieces:
//!
//! - [`Demux`]: the event demultiplexer abstraction. [`PollDemux`] wraps
//!   the OS readiness facility; [`LabDemux`] is a deterministic in-memory
//!   backend for tests.
//! - [`Registry`]: tracks live descriptors and owns the
//!   construct-then-publish discipline. A [`ResourceState`] is fully
//!   built while its creating thread is sole owner, then made reachable
//!   through exactly two mutex-guarded maps; any thread that finds it
//!   there observes it fully constructed.
//! - [`Scheduler`]: the wait/dispatch loop. Workers call
//!   [`Scheduler::run`] concurrently; other threads register, cancel, and
//!   retire operations at any time without pausing the workers.
//!
//! # Example
//!
//! ```no_run
//! use remux::{Interest, Scheduler, SchedulerConfig};
//! use std::os::unix::net::UnixStream;
//! use std::sync::Arc;
//!
//! # fn main() -> remux::Result<()> {
//! let scheduler = Arc::new(Scheduler::with_os_demux(SchedulerConfig::default())?);
//!
//! let (reader, writer) = UnixStream::pair()?;
//! reader.set_nonblocking(true)?;
//!
//! scheduler.register(
//!     &reader,
//!     Interest::READABLE,
//!     Box::new(|readiness| {
//!         println!("ready: {:?}", readiness);
//!     }),
//! )?;
//!
//! use std::io::Write;
//! (&writer).write_all(b"ping")?;
//!
//! scheduler.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread safety
//!
//! Every public type is `Send + Sync`. Completion callbacks always run
//! outside the locks that guard registration state, so a callback may
//! re-register, cancel, or retire on the scheduler that invoked it.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod demux;
pub mod error;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod state;

mod tracing_compat;

#[cfg(test)]
mod test_utils;

pub use config::SchedulerConfig;
pub use demux::{Demux, EventRecord, Events, Interest, LabDemux, PollDemux, Source};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use pool::ResourcePool;
pub use registry::Registry;
pub use scheduler::{OperationHandle, Scheduler, WorkGuard};
pub use state::{CompletionFn, Lifecycle, Operation, ResourceState};
