// ============================================
// File: crates/mixnet-core/src/protocol/replay.rs
// ============================================
//! # Replay Window
//!
//! ## Creation Reason
//! Every counter a hop accepts (link counters, request counters, response
//! counters) passes through one of these windows first.
//!
//! ## Main Functionality
//! - `ReplayWindow`: the W most recently accepted counters, sorted
//!
//! ## ⚠️ Important Note for Next Developer
//! - The window is seeded with W copies of the start value, so the start
//!   value itself is rejected and the first valid counter is `start + 1`
//! - Accepting evicts the smallest member, NOT the oldest by arrival
//!
//! ## Last Modified
//! v0.1.0 - Initial replay window

use crate::error::{CoreError, Result};
use crate::protocol::{CHANNEL_CTR_START, REPLAY_WINDOW_SIZE};

/// Fixed-capacity window of accepted counters.
///
/// # Example
/// ```
/// use mixnet_core::protocol::ReplayWindow;
///
/// let mut window = ReplayWindow::new(4, 0);
/// assert!(window.check(1).is_ok());
/// assert!(window.check(1).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    /// Ascending; `counters[0]` is the window minimum.
    counters: Vec<u64>,
}

impl ReplayWindow {
    /// Creates a window of `capacity` seeded with `start`.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, start: u64) -> Self {
        assert!(capacity > 0, "replay window capacity must be positive");
        Self {
            counters: vec![start; capacity],
        }
    }

    /// Returns `true` if `counter` would be rejected.
    #[must_use]
    pub fn contains(&self, counter: u64) -> bool {
        counter < self.min() || self.counters.binary_search(&counter).is_ok()
    }

    /// Accepts `counter` or fails with `ReplayDetected`.
    ///
    /// # Errors
    /// `ReplayDetected` if the counter is below the window minimum or was
    /// already accepted. The window is left unchanged in that case.
    pub fn check(&mut self, counter: u64) -> Result<()> {
        if self.contains(counter) {
            return Err(CoreError::replay(counter));
        }

        let pos = self.counters.partition_point(|&c| c < counter);
        self.counters.insert(pos, counter);
        self.counters.remove(0);
        Ok(())
    }

    /// Smallest counter in the window.
    #[must_use]
    pub fn min(&self) -> u64 {
        self.counters[0]
    }

    /// Capacity of the window.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.counters.len()
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new(REPLAY_WINDOW_SIZE, CHANNEL_CTR_START)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seeded_window_sequence() {
        let start = 100;
        let mut window = ReplayWindow::new(REPLAY_WINDOW_SIZE, start);

        for ctr in start + 1..=start + REPLAY_WINDOW_SIZE as u64 {
            window.check(ctr).unwrap();
        }

        for ctr in 1..=start {
            assert!(matches!(
                window.check(ctr),
                Err(CoreError::ReplayDetected { .. })
            ));
        }
        for ctr in start + 1..=start + REPLAY_WINDOW_SIZE as u64 {
            assert!(window.check(ctr).is_err());
        }

        window.check(start + REPLAY_WINDOW_SIZE as u64 + 1).unwrap();
    }

    #[test]
    fn test_start_value_rejected() {
        let mut window = ReplayWindow::default();
        assert!(window.check(CHANNEL_CTR_START).is_err());
        assert!(window.check(CHANNEL_CTR_START + 1).is_ok());
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut window = ReplayWindow::new(3, 0);
        window.check(5).unwrap();
        window.check(3).unwrap();
        window.check(4).unwrap();
        // window is now [3, 4, 5]
        assert_eq!(window.min(), 3);
        assert!(window.check(2).is_err());
        window.check(7).unwrap();
        assert_eq!(window.min(), 4);
        window.check(6).unwrap();
    }

    proptest! {
        #[test]
        fn prop_capacity_constant(ctrs in proptest::collection::vec(any::<u64>(), 0..200)) {
            let mut window = ReplayWindow::new(REPLAY_WINDOW_SIZE, 0);
            for ctr in ctrs {
                let min_before = window.min();
                if window.check(ctr).is_ok() {
                    prop_assert!(ctr >= min_before);
                }
                prop_assert_eq!(window.capacity(), REPLAY_WINDOW_SIZE);
            }
        }

        #[test]
        fn prop_accepted_never_accepted_again(ctrs in proptest::collection::vec(1u64..1000, 1..100)) {
            let mut window = ReplayWindow::new(REPLAY_WINDOW_SIZE, 0);
            for ctr in ctrs {
                if window.check(ctr).is_ok() {
                    prop_assert!(window.check(ctr).is_err());
                }
            }
        }
    }
}
