// ============================================
// File: crates/mixnet-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Channels at every hop are evicted after a period of inactivity. This
//! module provides the timestamp they carry for that decision.
//!
//! ## Main Functionality
//! - `AtomicInstant`: Thread-safe wrapper around `Instant`
//!
//! ## Main Logical Flow
//! 1. Channels store an `AtomicInstant` for last interaction
//! 2. Packet handling touches it on every accepted packet
//! 3. The cleanup tick reads it to decide eviction
//!
//! ## ⚠️ Important Note for Next Developer
//! - `AtomicInstant` uses `AtomicU64` internally (nanoseconds since start)
//! - Instants before the process reference clamp to the reference itself
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

// ============================================
// AtomicInstant
// ============================================

/// Thread-safe wrapper around [`Instant`].
///
/// Stores nanoseconds elapsed since a reference instant (first use in the
/// process) with relaxed ordering, so a `&Channel` can be touched without
/// a mutable borrow.
///
/// # Example
/// ```
/// use mixnet_common::time::AtomicInstant;
/// use std::time::Duration;
///
/// let last_interaction = AtomicInstant::now();
/// last_interaction.touch();
/// assert!(!last_interaction.has_elapsed(Duration::from_secs(60)));
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    nanos: AtomicU64,
}

impl AtomicInstant {
    fn reference() -> Instant {
        static REFERENCE: OnceLock<Instant> = OnceLock::new();
        *REFERENCE.get_or_init(Instant::now)
    }

    fn nanos_since_reference(instant: Instant) -> u64 {
        instant
            .checked_duration_since(Self::reference())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Creates a new `AtomicInstant` set to the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Creates a new `AtomicInstant` from an `Instant`.
    #[must_use]
    pub fn from_instant(instant: Instant) -> Self {
        Self {
            nanos: AtomicU64::new(Self::nanos_since_reference(instant)),
        }
    }

    /// Loads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        Self::reference() + Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    /// Stores a new instant.
    pub fn store(&self, instant: Instant) {
        self.nanos
            .store(Self::nanos_since_reference(instant), Ordering::Relaxed);
    }

    /// Updates to the current time and returns the previous value.
    pub fn touch(&self) -> Instant {
        let old = self.load();
        self.store(Instant::now());
        old
    }

    /// Returns the elapsed time since the stored instant.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.load().elapsed()
    }

    /// Checks if more than `duration` has elapsed since the stored instant.
    #[must_use]
    pub fn has_elapsed(&self, duration: Duration) -> bool {
        self.elapsed() > duration
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

impl Clone for AtomicInstant {
    fn clone(&self) -> Self {
        Self {
            nanos: AtomicU64::new(self.nanos.load(Ordering::Relaxed)),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_atomic_instant_basic() {
        let atomic = AtomicInstant::now();
        assert!(atomic.load().elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_atomic_instant_store() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        let before = atomic.load();
        atomic.store(Instant::now());
        assert!(atomic.load() > before);
    }

    #[test]
    fn test_atomic_instant_elapsed() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        assert!(atomic.elapsed() >= Duration::from_millis(10));
        assert!(atomic.has_elapsed(Duration::from_millis(5)));

        atomic.touch();
        assert!(!atomic.has_elapsed(Duration::from_secs(5)));
    }
}
