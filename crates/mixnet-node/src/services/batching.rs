// ============================================
// File: crates/mixnet-node/src/services/batching.rs
// ============================================
//! # Mix Store
//!
//! ## Creation Reason
//! Decouples send order from arrival order. Outbound packets collect in a
//! per-direction store; once the store holds `threshold` packets the whole
//! store is shuffled and released as one batch.
//!
//! ## Main Functionality
//! - `MixStore::push`: adds one outbound item
//! - `MixStore::take_batch`: shuffled release once the threshold is met
//!
//! ## ⚠️ Important Note for Next Developer
//! - A threshold of 1 releases every packet immediately, unshuffled in
//!   effect; anything above 1 makes release order independent of arrival
//!   order within a batch
//! - The store holds channel packets; link sealing happens on release so
//!   link counters are assigned in send order
//!
//! ## Last Modified
//! v0.1.0 - Initial mix store

use rand::rngs::OsRng;
use rand::seq::SliceRandom;

/// Threshold-triggered shuffling store.
#[derive(Debug)]
pub struct MixStore<T> {
    threshold: usize,
    pending: Vec<T>,
    rng: OsRng,
}

impl<T> MixStore<T> {
    /// Creates a store; a zero threshold is treated as 1.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: Vec::new(),
            rng: OsRng,
        }
    }

    pub fn push(&mut self, item: T) {
        self.pending.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        self.pending.extend(items);
    }

    /// Releases every pending item in random order, or nothing if the
    /// threshold is not yet reached.
    pub fn take_batch(&mut self) -> Vec<T> {
        if self.pending.len() < self.threshold {
            return Vec::new();
        }
        self.pending.shuffle(&mut self.rng);
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
