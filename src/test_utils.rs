//! Shared helpers for the crate's test suites.
//!
//! Unit tests call [`init_test_logging`] once per test and then use the
//! [`test_phase!`](crate::test_phase), [`assert_with_log!`](crate::assert_with_log),
//! and [`test_complete!`](crate::test_complete) macros so failures carry the
//! phase they occurred in alongside expected/actual values.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes a tracing subscriber for test output.
///
/// Idempotent; honors `RUST_LOG` for filtering. Safe to call from every
/// test without double-initialization panics.
pub fn init_test_logging() {
    INIT.call_once(|| {
        #[cfg(feature = "tracing")]
        {
            use tracing_subscriber::EnvFilter;
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("remux=debug"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .try_init();
        }
    });
}

/// Marks the beginning of a named test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::tracing_compat::debug!(phase = $name, "test phase start");
    };
}

/// Marks a test as complete in the log.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::tracing_compat::debug!(test = $name, "test complete");
    };
}

/// Asserts a condition, logging the description with expected and actual
/// values on failure.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        if !$cond {
            panic!(
                "assertion failed: {} (expected {:?}, got {:?})",
                $what, $expected, $actual
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        crate::test_phase!("init_is_idempotent");
        crate::assert_with_log!(true, "trivially true", true, true);
        crate::test_complete!("init_is_idempotent");
    }
}
