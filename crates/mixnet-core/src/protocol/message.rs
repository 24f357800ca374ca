// ============================================
// File: crates/mixnet-core/src/protocol/message.rs
// ============================================
//! # Mix Message Reassembly
//!
//! ## Creation Reason
//! Collects the fragments of each message id until the full payload can be
//! handed to the destination (exit) or the client (entry).
//!
//! ## Main Functionality
//! - `MixMessage`: fragments of one message id, stamped with its first
//!   arrival
//! - `MixMessageStore`: per-channel map of message id to `MixMessage`
//!
//! ## Security Limits
//! - At most `MAX_PENDING_REASSEMBLIES` incomplete messages per store
//! - Incomplete messages expire after `REASSEMBLY_TIMEOUT_SECS`
//!
//! ## ⚠️ Important Note for Next Developer
//! - A message is complete exactly when indices `0..=last` are all present
//! - Duplicate indices are ignored, never counted twice
//! - Completed messages are removed, so their id may be reused
//! - Message ids wrap around. A fragment that contradicts the partial
//!   message under its id (different bytes at a known index, a second last
//!   index) means the sender reused the id: the stale partial is dropped
//!   and reassembly restarts from the new fragment
//!
//! ## Last Modified
//! v0.1.0 - Initial reassembly store
//! v0.1.1 - Expiry, pending cap and stale partial replacement

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{CoreError, Result};
use crate::protocol::fragment::{parse_fragment, Fragment};
use crate::protocol::{MAX_PENDING_REASSEMBLIES, REASSEMBLY_TIMEOUT_SECS, SINGLE_FRAGMENT_ID};

// ============================================
// MixMessage
// ============================================

/// Outcome of adding one fragment to a [`MixMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentFit {
    /// New index, stored.
    Added,
    /// Same index with the same bytes, ignored.
    Duplicate,
    /// Contradicts what the message already holds.
    Conflict,
}

/// Reassembly state for one message id.
#[derive(Debug, Clone)]
pub struct MixMessage {
    fragments: BTreeMap<u8, Vec<u8>>,
    last_index: Option<u8>,
    first_received: Instant,
}

impl Default for MixMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl MixMessage {
    /// Creates an empty message stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Creates an empty message stamped with `now`.
    #[must_use]
    pub fn started_at(now: Instant) -> Self {
        Self {
            fragments: BTreeMap::new(),
            last_index: None,
            first_received: now,
        }
    }

    /// Adds a fragment unless it contradicts the fragments already held.
    pub fn add_fragment(&mut self, fragment: Fragment) -> FragmentFit {
        if let Some(existing) = self.fragments.get(&fragment.index) {
            let same_last = !fragment.is_last || self.last_index == Some(fragment.index);
            if *existing == fragment.payload && same_last {
                return FragmentFit::Duplicate;
            }
            return FragmentFit::Conflict;
        }

        if let Some(last) = self.last_index {
            if fragment.index > last || fragment.is_last {
                return FragmentFit::Conflict;
            }
        }
        if fragment.is_last && self.fragments.keys().any(|&i| i > fragment.index) {
            return FragmentFit::Conflict;
        }

        if fragment.is_last {
            self.last_index = Some(fragment.index);
        }
        self.fragments.insert(fragment.index, fragment.payload);
        FragmentFit::Added
    }

    /// Number of fragments the message has, once the last one arrived.
    #[must_use]
    pub fn fragment_count(&self) -> Option<usize> {
        self.last_index.map(|last| usize::from(last) + 1)
    }

    /// `true` when every index from 0 to the last index is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.last_index {
            Some(last) => (0..=last).all(|i| self.fragments.contains_key(&i)),
            None => false,
        }
    }

    /// `true` once the message waited longer than `max_age`.
    #[must_use]
    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.first_received) > max_age
    }

    /// Concatenated payload in index order, up to the last fragment.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let last = self.last_index.unwrap_or(u8::MAX);
        self.fragments
            .range(..=last)
            .flat_map(|(_, body)| body.iter().copied())
            .collect()
    }
}

// ============================================
// MixMessageStore
// ============================================

/// Reassembly store of one channel direction.
#[derive(Debug, Clone)]
pub struct MixMessageStore {
    messages: HashMap<u8, MixMessage>,
    max_age: Duration,
    max_pending: usize,
}

impl Default for MixMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MixMessageStore {
    /// Creates an empty store with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            Duration::from_secs(REASSEMBLY_TIMEOUT_SECS),
            MAX_PENDING_REASSEMBLIES,
        )
    }

    /// Creates an empty store with custom limits.
    #[must_use]
    pub fn with_limits(max_age: Duration, max_pending: usize) -> Self {
        Self {
            messages: HashMap::new(),
            max_age,
            max_pending,
        }
    }

    /// Feeds one raw fragment.
    ///
    /// Returns the payload if this fragment completed its message.
    ///
    /// # Errors
    /// Whatever [`parse_fragment`] returns, including
    /// `DummyOrEmptyPayload` for cover traffic, and
    /// `TooManyPendingMessages` when the fragment would open one message
    /// too many.
    pub fn feed(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        self.feed_at(raw, Instant::now())
    }

    /// [`feed`](Self::feed) with an explicit clock.
    ///
    /// # Errors
    /// See [`feed`](Self::feed).
    pub fn feed_at(&mut self, raw: &[u8], now: Instant) -> Result<Option<Vec<u8>>> {
        let fragment = parse_fragment(raw)?;

        if fragment.message_id == SINGLE_FRAGMENT_ID {
            return Ok(Some(fragment.payload));
        }

        let id = fragment.message_id;
        let max_age = self.max_age;

        let stale = self
            .messages
            .get(&id)
            .is_some_and(|message| message.is_expired(now, max_age));
        if stale {
            debug!(message_id = id, "Expired partial message replaced");
            self.messages.remove(&id);
        }

        if !self.messages.contains_key(&id) {
            if self.messages.len() >= self.max_pending {
                self.cleanup_expired(now);
            }
            if self.messages.len() >= self.max_pending {
                return Err(CoreError::TooManyPendingMessages {
                    current: self.messages.len(),
                    max: self.max_pending,
                });
            }
        }

        let message = self
            .messages
            .entry(id)
            .or_insert_with(|| MixMessage::started_at(now));

        if message.add_fragment(fragment.clone()) == FragmentFit::Conflict {
            debug!(
                message_id = id,
                index = fragment.index,
                "Reused message id, stale partial dropped"
            );
            let mut fresh = MixMessage::started_at(now);
            let _ = fresh.add_fragment(fragment);
            *message = fresh;
        }

        if message.is_complete() {
            let payload = message.payload();
            self.messages.remove(&id);
            return Ok(Some(payload));
        }
        Ok(None)
    }

    /// Drops every incomplete message older than the store's maximum age.
    ///
    /// Returns the number of messages dropped.
    pub fn cleanup_expired(&mut self, now: Instant) -> usize {
        let max_age = self.max_age;
        let before = self.messages.len();
        self.messages
            .retain(|_, message| !message.is_expired(now, max_age));
        before - self.messages.len()
    }

    /// Number of incomplete messages.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.messages.len()
    }
}

// ============================================
// Tests
// ============================================
