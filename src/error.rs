//! Error types and error handling strategy for remux.
//!
//! This module defines the core error types used throughout the reactor.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Registration failures surface synchronously to the caller with no
//!   partially-published state left reachable
//! - Interrupted or timed-out kernel waits are never errors; a wait that
//!   produces no events is a normal, silent outcome the caller loops on
//! - Any other kernel wait failure is fatal for the scheduler, which
//!   transitions to stopped and wakes all workers
//!
//! # Error Categories
//!
//! - **Resource**: kernel watch-table or allocation exhaustion
//! - **Descriptor**: operating on unknown or retired descriptors
//! - **Lifecycle**: state-machine violations and cancelled operations
//! - **Io**: wrapped OS errors from the demultiplexer boundary

use std::fmt;
use std::io;
use std::sync::Arc;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Kernel watch table full or allocation failed.
    ResourceExhausted,
    /// Descriptor is not valid or not registered.
    InvalidDescriptor,
    /// Operation attempted against a retired or unpublished resource,
    /// or a handle that no longer names a pending operation.
    InvalidState,
    /// Operation was cancelled before its readiness arrived.
    Cancelled,
    /// Scheduler has been stopped; no further work is accepted.
    Shutdown,
    /// OS-level error from the demultiplexer.
    Io,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ResourceExhausted => ErrorCategory::Resource,
            Self::InvalidDescriptor => ErrorCategory::Descriptor,
            Self::InvalidState | Self::Cancelled | Self::Shutdown => ErrorCategory::Lifecycle,
            Self::Io => ErrorCategory::Io,
        }
    }

    /// Returns true if a caller may reasonably retry after this error.
    ///
    /// Only resource exhaustion is transient; lifecycle and descriptor
    /// errors will not succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted)
    }

    /// Returns a static human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExhausted => "resource exhausted",
            Self::InvalidDescriptor => "invalid descriptor",
            Self::InvalidState => "invalid state",
            Self::Cancelled => "cancelled",
            Self::Shutdown => "shutdown",
            Self::Io => "io error",
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Kernel table / memory exhaustion.
    Resource,
    /// Descriptor identity failures.
    Descriptor,
    /// Lifecycle and state-machine failures.
    Lifecycle,
    /// Wrapped OS errors.
    Io,
}

/// The main error type for remux operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error represents scheduler shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, ErrorKind::Shutdown)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Shorthand for an [`ErrorKind::InvalidState`] error with a message.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState).with_message(msg)
    }

    /// Shorthand for an [`ErrorKind::InvalidDescriptor`] error with a message.
    #[must_use]
    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidDescriptor).with_message(msg)
    }

    /// Shorthand for an [`ErrorKind::Cancelled`] error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    /// Maps OS errors at the demultiplexer boundary onto typed kinds.
    ///
    /// `EBADF`-class errors become `InvalidDescriptor`; table/memory
    /// exhaustion becomes `ResourceExhausted`; everything else is carried
    /// as `Io` with the original error as source.
    fn from(err: io::Error) -> Self {
        let kind = match err.raw_os_error() {
            Some(libc::EBADF) | Some(libc::ENOENT) => ErrorKind::InvalidDescriptor,
            Some(libc::ENOMEM) | Some(libc::ENOSPC) | Some(libc::EMFILE)
            | Some(libc::ENFILE) => ErrorKind::ResourceExhausted,
            _ => match err.kind() {
                io::ErrorKind::NotFound => ErrorKind::InvalidDescriptor,
                io::ErrorKind::OutOfMemory => ErrorKind::ResourceExhausted,
                _ => ErrorKind::Io,
            },
        };
        Self::new(kind).with_source(err)
    }
}
