//! Compatibility facade over the `tracing` crate.
//!
//! The reactor logs through this module so that the `tracing` dependency
//! stays optional: with the `tracing` feature enabled (the default) these
//! re-export the real macros; without it they compile to nothing.

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, trace, warn};

#[cfg(not(feature = "tracing"))]
mod noop {
    /// No-op stand-in for `tracing::trace!`.
    #[macro_export]
    macro_rules! _remux_trace {
        ($($arg:tt)*) => {};
    }
    /// No-op stand-in for `tracing::debug!`.
    #[macro_export]
    macro_rules! _remux_debug {
        ($($arg:tt)*) => {};
    }
    /// No-op stand-in for `tracing::warn!`.
    #[macro_export]
    macro_rules! _remux_warn {
        ($($arg:tt)*) => {};
    }
    /// No-op stand-in for `tracing::error!`.
    #[macro_export]
    macro_rules! _remux_error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{
        _remux_debug as debug, _remux_error as error, _remux_trace as trace, _remux_warn as warn,
    };
}

#[cfg(not(feature = "tracing"))]
pub use noop::{debug, error, trace, warn};
