// ============================================
// File: crates/mixnet-node/src/channels/mid.rs
// ============================================
//! # Mid Channels
//!
//! ## Creation Reason
//! An intermediate hop holds one key per channel. It removes exactly one
//! layer from requests and adds exactly one layer to responses, renaming
//! the channel between its incoming and outgoing id.
//!
//! ## Main Functionality
//! - `MidRegistry::handle_request`: INIT and DATA from the previous hop
//! - `MidRegistry::handle_response`: DATA and CONFIRM from the next hop
//! - `MidRegistry::cleanup_expired`: drops idle channels from both id maps
//!
//! ## Layer Handling
//! ```text
//! request : in(ctr, E_k(next_ctr ‖ rest))  ──►  out(next_ctr, rest ‖ random 8)
//! response: out(ctr, payload)              ──►  in(r, E_k(ctr ‖ payload[..504]))
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A repeated INIT for a known incoming id must yield the same key;
//!   anything else means hops disagree on key derivation, and we panic
//! - A repeated INIT reuses the existing outgoing id
//! - Response message types pass through unchanged, so CONFIRM consumes a
//!   response counter like DATA does
//! - The link MAC authenticates the link header only. A repeated INIT whose
//!   onion was corrupted in transit recovers a different key and reaches
//!   the same assertion as a real key disagreement
//! - Only requests refresh a channel. Responses alone never keep it alive,
//!   so the channel ages out with the entry that stopped sending
//! - Expired outgoing ids are held back before reuse; see `IdTable`
//!
//! ## Last Modified
//! v0.1.0 - Initial mid channels
//! v0.1.1 - Request-only liveness, retired outgoing ids

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use mixnet_common::{AtomicInstant, ChannelId, Counter};
use mixnet_core::crypto::{
    Direction, OnionKeyPair, OnionMessage, SymmetricChannelCipher, SymmetricKey,
};
use mixnet_core::error::CoreError;
use mixnet_core::protocol::{
    ChannelPacket, MessageType, ReplayWindow, CHANNEL_CTR_START, CTR_PREFIX_LEN, PACKET_SIZE,
    REPLAY_WINDOW_SIZE,
};

use super::{pad_random, random_counter, retired_id_hold, split_counter, IdTable};
use crate::error::{NodeError, Result};

struct MidChannel {
    out_id: ChannelId,
    key: SymmetricKey,
    request_window: ReplayWindow,
    response_window: ReplayWindow,
    response_counter: Counter,
    last_interaction: AtomicInstant,
}

/// Channel table of an intermediate hop, keyed by incoming id.
pub struct MidRegistry {
    onion_key: OnionKeyPair,
    cipher: Arc<dyn SymmetricChannelCipher>,
    ids: IdTable,
    channels: HashMap<ChannelId, MidChannel>,
    max_channels: usize,
    channel_timeout: Duration,
}

impl MidRegistry {
    #[must_use]
    pub fn new(
        onion_key: OnionKeyPair,
        cipher: Arc<dyn SymmetricChannelCipher>,
        max_channels: usize,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            onion_key,
            cipher,
            ids: IdTable::new(retired_id_hold(channel_timeout)),
            channels: HashMap::new(),
            max_channels,
            channel_timeout,
        }
    }

    /// Handles a packet from the previous hop and returns the packet for
    /// the next hop.
    ///
    /// # Errors
    /// - `Core(MalformedOnionMessage)` for an unreadable INIT
    /// - `Core(ReplayDetected)` for a reused DATA counter
    /// - `UnknownChannel` for DATA on an id without a prior INIT
    /// - `UnexpectedMessage` for a CONFIRM
    /// - `ChannelLimitReached` if a new channel would exceed the limit
    ///
    /// # Panics
    /// Panics if a repeated INIT recovers a different key.
    pub fn handle_request(&mut self, packet: ChannelPacket) -> Result<ChannelPacket> {
        match packet.msg_type {
            MessageType::ChannelInit => self.handle_init(packet),
            MessageType::Data => self.handle_data(packet),
            MessageType::ChannelConfirm => Err(NodeError::unexpected(
                packet.channel_id,
                packet.msg_type,
                "CONFIRM on the request path",
            )),
        }
    }

    fn handle_init(&mut self, packet: ChannelPacket) -> Result<ChannelPacket> {
        let in_id = packet.channel_id;
        let onion = OnionMessage::from_bytes(&packet.payload)?;
        let processed = onion.process(&self.onion_key)?;

        let out_id = if let Some(channel) = self.channels.get(&in_id) {
            assert_eq!(
                channel.key, processed.channel_key,
                "repeated INIT on channel {in_id} recovered a different key"
            );
            channel.last_interaction.touch();
            trace!(channel_id = %in_id, "Repeated INIT");
            channel.out_id
        } else {
            if self.channels.len() >= self.max_channels {
                return Err(NodeError::ChannelLimitReached {
                    limit: self.max_channels,
                });
            }

            let out_id = self.ids.allocate_out()?;
            self.ids.insert(in_id, out_id);
            self.channels.insert(
                in_id,
                MidChannel {
                    out_id,
                    key: processed.channel_key,
                    request_window: ReplayWindow::new(REPLAY_WINDOW_SIZE, CHANNEL_CTR_START),
                    response_window: ReplayWindow::new(REPLAY_WINDOW_SIZE, CHANNEL_CTR_START),
                    response_counter: Counter::new(CHANNEL_CTR_START),
                    last_interaction: AtomicInstant::now(),
                },
            );
            info!(channel_id = %in_id, out_id = %out_id, "Channel created");
            out_id
        };

        Ok(ChannelPacket::new(
            out_id,
            MessageType::ChannelInit,
            random_counter(),
            processed.forwarded.to_bytes(),
        ))
    }

    fn handle_data(&mut self, packet: ChannelPacket) -> Result<ChannelPacket> {
        let in_id = packet.channel_id;
        let channel = self
            .channels
            .get_mut(&in_id)
            .ok_or(NodeError::UnknownChannel(in_id))?;

        channel.request_window.check(packet.counter)?;
        channel.last_interaction.touch();

        let plain = self.cipher.decrypt(
            &channel.key,
            packet.counter,
            Direction::Request,
            &packet.payload,
        );
        let (next_counter, rest) = split_counter(&plain)?;

        let mut payload = rest.to_vec();
        pad_random(&mut payload, rest.len() + CTR_PREFIX_LEN);

        trace!(channel_id = %in_id, counter = packet.counter, "Request layer removed");
        Ok(ChannelPacket::new(
            channel.out_id,
            MessageType::Data,
            next_counter,
            payload,
        ))
    }

    /// Handles a packet from the next hop and returns the packet for the
    /// previous hop.
    ///
    /// # Errors
    /// - `UnknownChannel` for an outgoing id not in the table
    /// - `UnexpectedMessage` for an INIT
    /// - `Core(ReplayDetected)` for a reused response counter
    /// - `Core(MessageTooShort)` for a truncated payload
    pub fn handle_response(&mut self, packet: ChannelPacket) -> Result<ChannelPacket> {
        let out_id = packet.channel_id;
        if packet.msg_type == MessageType::ChannelInit {
            return Err(NodeError::unexpected(
                out_id,
                packet.msg_type,
                "INIT on the response path",
            ));
        }

        let in_id = self
            .ids
            .in_for(out_id)
            .ok_or(NodeError::UnknownChannel(out_id))?;
        let channel = self
            .channels
            .get_mut(&in_id)
            .ok_or(NodeError::UnknownChannel(in_id))?;

        let keep = PACKET_SIZE - CTR_PREFIX_LEN;
        if packet.payload.len() < keep {
            return Err(CoreError::too_short(keep, packet.payload.len()).into());
        }

        channel.response_window.check(packet.counter)?;

        let mut plain = Vec::with_capacity(PACKET_SIZE);
        plain.extend_from_slice(&packet.counter.to_be_bytes());
        plain.extend_from_slice(&packet.payload[..keep]);

        let counter = channel.response_counter.next();
        let payload = self
            .cipher
            .encrypt(&channel.key, counter, Direction::Response, &plain);

        trace!(channel_id = %in_id, counter, msg_type = ?packet.msg_type, "Response layer added");
        Ok(ChannelPacket::new(in_id, packet.msg_type, counter, payload))
    }

    /// Removes channels idle for longer than the channel timeout and
    /// releases outgoing ids whose hold ended.
    ///
    /// Returns the `(incoming, outgoing)` id pairs removed.
    pub fn cleanup_expired(&mut self) -> Vec<(ChannelId, ChannelId)> {
        let now = Instant::now();
        let released = self.ids.purge_retired(now);
        if released > 0 {
            debug!(released, "Retired outgoing ids released");
        }

        let expired: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, c)| c.last_interaction.has_elapsed(self.channel_timeout))
            .map(|(id, _)| *id)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for in_id in expired {
            self.channels.remove(&in_id);
            if let Some(out_id) = self.ids.remove_by_in(in_id, now) {
                debug!(channel_id = %in_id, out_id = %out_id, "Channel expired");
                removed.push((in_id, out_id));
            }
        }

        if !removed.is_empty() {
            info!("Cleaned up {} expired channels", removed.len());
        }
        removed
    }

    /// Outgoing id for an incoming id.
    #[must_use]
    pub fn out_id(&self, in_id: ChannelId) -> Option<ChannelId> {
        self.ids.out_for(in_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl std::fmt::Debug for MidRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidRegistry")
            .field("onion_public", self.onion_key.public_key())
            .field("channels", &self.channels.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    use mixnet_common::Destination;
    use mixnet_core::crypto::{CtrChannelCipher, GROUP_ELEMENT_LEN};
    use mixnet_core::protocol::{dummy_fragment, INIT_FRAG_SIZE};
    use std::net::Ipv4Addr;

    struct Fixture {
        mid: MidRegistry,
        next_hop: OnionKeyPair,
        keys: Vec<SymmetricKey>,
        init: ChannelPacket,
    }

    fn fixture() -> Fixture {
        let mid_key = OnionKeyPair::generate();
        let next_hop = OnionKeyPair::generate();
        let keys = vec![SymmetricKey::generate(), SymmetricKey::generate()];

        let mut payload = Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456)
            .to_bytes()
            .to_vec();
        payload.extend_from_slice(&dummy_fragment(INIT_FRAG_SIZE));
        let onion = OnionMessage::build(
            &[*mid_key.public_key(), *next_hop.public_key()],
            &keys,
            &payload,
        )
        .unwrap();

        let init = ChannelPacket::new(
            ChannelId::new(41).unwrap(),
            MessageType::ChannelInit,
            random_counter(),
            onion.to_bytes(),
        );

        Fixture {
            mid: MidRegistry::new(
                mid_key,
                Arc::new(CtrChannelCipher::new()),
                16,
                Duration::from_secs(300),
            ),
            next_hop,
            keys,
            init,
        }
    }

    #[test]
    fn test_init_forwards_peeled_onion() {
        let mut f = fixture();
        let forwarded = f.mid.handle_request(f.init.clone()).unwrap();

        assert_eq!(forwarded.msg_type, MessageType::ChannelInit);
        assert_eq!(forwarded.payload.len(), f.init.payload.len());
        assert_eq!(f.mid.out_id(f.init.channel_id), Some(forwarded.channel_id));

        let onion = OnionMessage::from_bytes(&forwarded.payload).unwrap();
        let processed = onion.process(&f.next_hop).unwrap();
        assert_eq!(processed.channel_key, f.keys[1]);
    }

    #[test]
    fn test_duplicate_init_keeps_key_and_out_id() {
        let mut f = fixture();
        let first = f.mid.handle_request(f.init.clone()).unwrap();
        let second = f.mid.handle_request(f.init.clone()).unwrap();

        assert_eq!(first.channel_id, second.channel_id);
        assert_eq!(f.mid.len(), 1);
        assert_eq!(f.mid.ids.len(), 1);
        assert_eq!(f.mid.channels[&f.init.channel_id].key, f.keys[0]);
    }

    #[test]
    #[should_panic(expected = "different key")]
    fn test_init_with_different_key_panics() {
        let mut f = fixture();
        f.mid.handle_request(f.init.clone()).unwrap();

        let mut payload = Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456)
            .to_bytes()
            .to_vec();
        payload.extend_from_slice(&dummy_fragment(INIT_FRAG_SIZE));
        let onion = OnionMessage::build(
            &[*f.mid.onion_key.public_key()],
            &[SymmetricKey::generate()],
            &payload,
        )
        .unwrap();

        let mut conflicting = f.init.clone();
        conflicting.payload = onion.to_bytes();
        let _ = f.mid.handle_request(conflicting);
    }

    #[test]
    fn test_data_layer_removed_and_replay_rejected() {
        let mut f = fixture();
        let out_id = f.mid.handle_request(f.init.clone()).unwrap().channel_id;
        let cipher = CtrChannelCipher::new();

        let inner = vec![0xAB; PACKET_SIZE - CTR_PREFIX_LEN];
        let mut plain = 9u64.to_be_bytes().to_vec();
        plain.extend_from_slice(&inner);
        let payload = cipher.encrypt(&f.keys[0], 1, Direction::Request, &plain);
        let packet = ChannelPacket::new(f.init.channel_id, MessageType::Data, 1, payload);

        let forwarded = f.mid.handle_request(packet.clone()).unwrap();
        assert_eq!(forwarded.channel_id, out_id);
        assert_eq!(forwarded.counter, 9);
        assert_eq!(forwarded.payload.len(), PACKET_SIZE);
        assert_eq!(&forwarded.payload[..inner.len()], &inner[..]);

        let err = f.mid.handle_request(packet).unwrap_err();
        assert!(err.is_suspicious());
    }

    #[test]
    fn test_response_layer_added() {
        let mut f = fixture();
        let out_id = f.mid.handle_request(f.init.clone()).unwrap().channel_id;
        let cipher = CtrChannelCipher::new();

        let inner = vec![0x11; PACKET_SIZE];
        let response = ChannelPacket::new(out_id, MessageType::ChannelConfirm, 5, inner.clone());
        let back = f.mid.handle_response(response.clone()).unwrap();

        assert_eq!(back.channel_id, f.init.channel_id);
        assert_eq!(back.msg_type, MessageType::ChannelConfirm);
        assert_eq!(back.counter, 1);
        assert_eq!(back.payload.len(), PACKET_SIZE);

        let plain = cipher.decrypt(&f.keys[0], back.counter, Direction::Response, &back.payload);
        let (ctr, rest) = split_counter(&plain).unwrap();
        assert_eq!(ctr, 5);
        assert_eq!(rest, &inner[..PACKET_SIZE - CTR_PREFIX_LEN]);

        // The response window covers the very first response too.
        assert!(f.mid.handle_response(response).unwrap_err().is_suspicious());
    }

    #[test]
    fn test_unknown_and_unexpected() {
        let mut f = fixture();
        let stray = ChannelPacket::new(
            ChannelId::new(999).unwrap(),
            MessageType::Data,
            1,
            vec![0u8; PACKET_SIZE],
        );
        assert!(matches!(
            f.mid.handle_request(stray.clone()),
            Err(NodeError::UnknownChannel(_))
        ));
        assert!(matches!(
            f.mid.handle_response(stray),
            Err(NodeError::UnknownChannel(_))
        ));

        let mut confirm = f.init.clone();
        confirm.msg_type = MessageType::ChannelConfirm;
        assert!(matches!(
            f.mid.handle_request(confirm),
            Err(NodeError::UnexpectedMessage { .. })
        ));
    }

    #[test]
    fn test_malformed_init_dropped() {
        let mut f = fixture();
        let mut truncated = f.init.clone();
        truncated.payload.truncate(40);
        let err = f.mid.handle_request(truncated).unwrap_err();
        assert!(err.is_packet_drop());
        assert!(f.mid.is_empty());
    }

    #[test]
    fn test_cleanup_removes_both_ids() {
        let mut f = fixture();
        f.mid.channel_timeout = Duration::ZERO;
        let out_id = f.mid.handle_request(f.init.clone()).unwrap().channel_id;

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(f.mid.cleanup_expired(), vec![(f.init.channel_id, out_id)]);
        assert!(f.mid.is_empty());
        assert_eq!(f.mid.ids.in_for(out_id), None);
        assert_eq!(f.mid.out_id(f.init.channel_id), None);
    }

    #[test]
    fn test_expired_out_id_not_reused_while_held() {
        let mut f = fixture();
        let out_id = f.mid.handle_request(f.init.clone()).unwrap().channel_id;

        f.mid.channel_timeout = Duration::ZERO;
        std::thread::sleep(Duration::from_millis(5));
        f.mid.cleanup_expired();
        assert!(f.mid.is_empty());

        // Held for twice the 300 s timeout the registry was built with.
        assert!(f.mid.ids.is_out_reserved(out_id));
        for _ in 0..64 {
            assert_ne!(f.mid.ids.allocate_out().unwrap(), out_id);
        }
        f.mid.cleanup_expired();
        assert!(f.mid.ids.is_out_reserved(out_id));
    }

    #[test]
    fn test_responses_do_not_keep_channel_alive() {
        let mut f = fixture();
        let out_id = f.mid.handle_request(f.init.clone()).unwrap().channel_id;
        f.mid.channel_timeout = Duration::from_millis(20);

        std::thread::sleep(Duration::from_millis(30));
        let response = ChannelPacket::new(out_id, MessageType::Data, 1, vec![0u8; PACKET_SIZE]);
        f.mid.handle_response(response).unwrap();

        assert_eq!(f.mid.cleanup_expired(), vec![(f.init.channel_id, out_id)]);
    }

    #[test]
    #[should_panic(expected = "different key")]
    fn test_corrupted_repeated_init_panics() {
        let mut f = fixture();
        f.mid.handle_request(f.init.clone()).unwrap();

        let mut corrupted = f.init.clone();
        corrupted.payload[GROUP_ELEMENT_LEN] ^= 0x80;
        let _ = f.mid.handle_request(corrupted);
    }
}
