// ============================================
// File: crates/mixnet-node/src/channels/id_table.rs
// ============================================
//! # Incoming/Outgoing Channel Id Table
//!
//! ## Creation Reason
//! A mix hop knows each channel under two ids: the one the previous hop
//! chose (incoming) and the one it chose itself for the next hop
//! (outgoing). Requests are looked up by the first, responses by the
//! second.
//!
//! ## Main Functionality
//! - `IdTable`: two plain maps kept consistent on every insert and removal
//! - Random allocation of unused outgoing ids
//! - `RetiredIds`: ids held back after their channel expired
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both maps must always hold exactly the same pairs; go through the
//!   methods here, never touch the maps directly
//! - An expired outgoing id may still be live at the next hop, which only
//!   drops the channel after its own timeout and cleanup pass. Handing the
//!   id out again before then makes the next hop see a foreign INIT under a
//!   known id. Retired ids are therefore not allocated until their hold ends
//!
//! ## Last Modified
//! v0.1.0 - Initial id table
//! v0.1.1 - Retired id hold

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mixnet_common::ChannelId;

use crate::error::Result;

// ============================================
// RetiredIds
// ============================================

/// Channel ids that must not be handed out again yet.
#[derive(Debug)]
pub struct RetiredIds {
    until: HashMap<ChannelId, Instant>,
    hold: Duration,
}

impl RetiredIds {
    #[must_use]
    pub fn new(hold: Duration) -> Self {
        Self {
            until: HashMap::new(),
            hold,
        }
    }

    /// Holds `id` back for the configured duration from `now`.
    pub fn retire(&mut self, id: ChannelId, now: Instant) {
        self.retire_until(id, now + self.hold);
    }

    /// Holds `id` back until `until`.
    pub fn retire_until(&mut self, id: ChannelId, until: Instant) {
        self.until.insert(id, until);
    }

    #[must_use]
    pub fn contains(&self, id: ChannelId) -> bool {
        self.until.contains_key(&id)
    }

    /// Releases every id whose hold ended by `now`; returns how many.
    pub fn purge(&mut self, now: Instant) -> usize {
        let before = self.until.len();
        self.until.retain(|_, until| *until > now);
        before - self.until.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.until.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}

// ============================================
// IdTable
// ============================================

/// Bijection between incoming and outgoing channel ids.
#[derive(Debug)]
pub struct IdTable {
    by_in: HashMap<ChannelId, ChannelId>,
    by_out: HashMap<ChannelId, ChannelId>,
    retired: RetiredIds,
}

impl IdTable {
    /// Creates an empty table; removed outgoing ids are held for `hold`.
    #[must_use]
    pub fn new(hold: Duration) -> Self {
        Self {
            by_in: HashMap::new(),
            by_out: HashMap::new(),
            retired: RetiredIds::new(hold),
        }
    }

    /// Picks a random outgoing id that is neither in the table nor retired.
    ///
    /// # Errors
    /// `Common(ResourceExhausted)` if all 65535 ids are taken or held.
    pub fn allocate_out(&self) -> Result<ChannelId> {
        Ok(ChannelId::random_unused(|id| {
            self.by_out.contains_key(&id) || self.retired.contains(id)
        })?)
    }

    /// Records a pair.
    ///
    /// # Panics
    /// Panics if either id is already present.
    pub fn insert(&mut self, in_id: ChannelId, out_id: ChannelId) {
        assert!(
            !self.by_in.contains_key(&in_id) && !self.by_out.contains_key(&out_id),
            "channel id pair {in_id} -> {out_id} overlaps an existing entry"
        );
        self.by_in.insert(in_id, out_id);
        self.by_out.insert(out_id, in_id);
    }

    #[must_use]
    pub fn out_for(&self, in_id: ChannelId) -> Option<ChannelId> {
        self.by_in.get(&in_id).copied()
    }

    #[must_use]
    pub fn in_for(&self, out_id: ChannelId) -> Option<ChannelId> {
        self.by_out.get(&out_id).copied()
    }

    /// `true` while `out_id` is in use or still held after removal.
    #[must_use]
    pub fn is_out_reserved(&self, out_id: ChannelId) -> bool {
        self.by_out.contains_key(&out_id) || self.retired.contains(out_id)
    }

    /// Removes the pair holding `in_id` and retires its outgoing id.
    ///
    /// Returns the outgoing id.
    pub fn remove_by_in(&mut self, in_id: ChannelId, now: Instant) -> Option<ChannelId> {
        let out_id = self.by_in.remove(&in_id)?;
        self.by_out.remove(&out_id);
        self.retired.retire(out_id, now);
        Some(out_id)
    }

    /// Releases retired outgoing ids whose hold ended by `now`.
    pub fn purge_retired(&mut self, now: Instant) -> usize {
        self.retired.purge(now)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_in.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_in.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_secs(600);

    fn id(value: u16) -> ChannelId {
        ChannelId::new(value).unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = IdTable::new(HOLD);
        table.insert(id(7), id(900));

        assert_eq!(table.out_for(id(7)), Some(id(900)));
        assert_eq!(table.in_for(id(900)), Some(id(7)));
        assert_eq!(table.out_for(id(900)), None);
        assert!(table.is_out_reserved(id(900)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let now = Instant::now();
        let mut table = IdTable::new(HOLD);
        table.insert(id(1), id(2));
        table.insert(id(3), id(4));

        assert_eq!(table.remove_by_in(id(1), now), Some(id(2)));
        assert_eq!(table.out_for(id(1)), None);
        assert_eq!(table.in_for(id(2)), None);

        assert_eq!(table.remove_by_in(id(3), now), Some(id(4)));
        assert!(table.is_empty());
        assert_eq!(table.remove_by_in(id(3), now), None);
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn test_duplicate_out_id_panics() {
        let mut table = IdTable::new(HOLD);
        table.insert(id(1), id(2));
        table.insert(id(5), id(2));
    }

    #[test]
    fn test_allocate_out_skips_used() {
        let mut table = IdTable::new(HOLD);
        for value in 1..=u16::MAX - 1 {
            table.insert(id(value), id(value));
        }
        assert_eq!(table.allocate_out().unwrap(), id(u16::MAX));
    }

    #[test]
    fn test_removed_out_id_held_until_hold_ends() {
        let now = Instant::now();
        let mut table = IdTable::new(HOLD);
        for value in 1..=u16::MAX {
            table.insert(id(value), id(value));
        }

        assert_eq!(table.remove_by_in(id(5), now), Some(id(5)));
        assert!(table.is_out_reserved(id(5)));
        assert!(table.allocate_out().is_err());

        assert_eq!(table.purge_retired(now + HOLD / 2), 0);
        assert!(table.allocate_out().is_err());

        assert_eq!(table.purge_retired(now + HOLD + Duration::from_secs(1)), 1);
        assert_eq!(table.allocate_out().unwrap(), id(5));
    }

    #[test]
    fn test_retired_ids_purge() {
        let now = Instant::now();
        let mut retired = RetiredIds::new(Duration::from_secs(10));
        retired.retire(id(1), now);
        retired.retire_until(id(2), now + Duration::from_secs(60));
        assert_eq!(retired.len(), 2);

        assert_eq!(retired.purge(now + Duration::from_secs(11)), 1);
        assert!(!retired.contains(id(1)));
        assert!(retired.contains(id(2)));
        assert_eq!(retired.purge(now + Duration::from_secs(61)), 1);
        assert!(retired.is_empty());
    }
}
