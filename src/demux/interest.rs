//! Interest flags for I/O readiness.
//!
//! This module defines the [`Interest`] bitflags for specifying which
//! readiness events to monitor on watched descriptors, and for describing
//! the readiness reported back by a demultiplexer.
//!
//! # Platform Mapping
//!
//! | Interest Flag | epoll          | kqueue       |
//! |---------------|----------------|--------------|
//! | READABLE      | EPOLLIN        | EVFILT_READ  |
//! | WRITABLE      | EPOLLOUT       | EVFILT_WRITE |
//! | ERROR         | EPOLLERR       | EV_ERROR     |
//! | HUP           | EPOLLHUP/RDHUP | EV_EOF       |
//!
//! # Example
//!
//! ```ignore
//! use remux::Interest;
//!
//! let interest = Interest::READABLE | Interest::WRITABLE;
//! assert!(interest.contains(Interest::READABLE));
//! assert!(interest.is_writable());
//! ```

use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Interest in I/O readiness events.
///
/// Combines multiple interests with the `|` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Interest(u8);

impl Interest {
    /// No interest (empty set).
    pub const NONE: Self = Self(0);

    /// Interested in read readiness.
    pub const READABLE: Self = Self(1 << 0);

    /// Interested in write readiness.
    pub const WRITABLE: Self = Self(1 << 1);

    /// Interested in error conditions.
    pub const ERROR: Self = Self(1 << 2);

    /// Interested in hang-up (peer closed).
    pub const HUP: Self = Self(1 << 3);

    /// Common combination for sockets.
    pub const SOCKET: Self =
        Self(Self::READABLE.0 | Self::WRITABLE.0 | Self::ERROR.0 | Self::HUP.0);

    /// Returns interest in readable events.
    #[must_use]
    pub const fn readable() -> Self {
        Self::READABLE
    }

    /// Returns interest in writable events.
    #[must_use]
    pub const fn writable() -> Self {
        Self::WRITABLE
    }

    /// Returns interest in both readable and writable events.
    #[must_use]
    pub const fn both() -> Self {
        Self(Self::READABLE.0 | Self::WRITABLE.0)
    }

    /// Create empty interest set.
    #[must_use]
    pub const fn empty() -> Self {
        Self::NONE
    }

    /// Create interest from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Get raw bits.
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if interest contains all flags in other.
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if any flag overlaps with other.
    #[must_use]
    pub const fn intersects(&self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Check if interest is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Check if readable interest is set.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        (self.0 & Self::READABLE.0) != 0
    }

    /// Check if writable interest is set.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        (self.0 & Self::WRITABLE.0) != 0
    }

    /// Check if error interest is set.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        (self.0 & Self::ERROR.0) != 0
    }

    /// Check if HUP interest is set.
    #[must_use]
    pub const fn is_hup(&self) -> bool {
        (self.0 & Self::HUP.0) != 0
    }

    /// Combines interests by adding flags.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Removes interest flags.
    #[must_use]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Interest {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Interest {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut flags = Vec::new();
        if self.is_readable() {
            flags.push("READABLE");
        }
        if self.is_writable() {
            flags.push("WRITABLE");
        }
        if self.is_error() {
            flags.push("ERROR");
        }
        if self.is_hup() {
            flags.push("HUP");
        }
        if flags.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_contains() {
        let interest = Interest::READABLE | Interest::WRITABLE;
        assert!(interest.contains(Interest::READABLE));
        assert!(interest.contains(Interest::WRITABLE));
        assert!(!interest.contains(Interest::ERROR));
        assert!(interest.is_readable());
        assert!(interest.is_writable());
    }

    #[test]
    fn intersects_partial_overlap() {
        let interest = Interest::READABLE | Interest::ERROR;
        assert!(interest.intersects(Interest::READABLE | Interest::WRITABLE));
        assert!(!interest.intersects(Interest::WRITABLE));
    }

    #[test]
    fn remove_flags() {
        let interest = Interest::SOCKET.remove(Interest::WRITABLE);
        assert!(interest.is_readable());
        assert!(!interest.is_writable());
        assert!(interest.is_error());
        assert!(interest.is_hup());
    }

    #[test]
    fn empty_is_none() {
        assert!(Interest::empty().is_empty());
        assert_eq!(Interest::empty(), Interest::NONE);
        assert_eq!(Interest::NONE.to_string(), "NONE");
    }

    #[test]
    fn display_joins_flags() {
        let interest = Interest::READABLE | Interest::HUP;
        assert_eq!(interest.to_string(), "READABLE|HUP");
    }

    #[test]
    fn bits_round_trip() {
        let interest = Interest::WRITABLE | Interest::ERROR;
        assert_eq!(Interest::from_bits(interest.bits()), interest);
    }
}
