// ============================================
// File: crates/mixnet-node/src/channels/entry.rs
// ============================================
//! # Entry Channels
//!
//! ## Creation Reason
//! The entry is the only hop that knows every channel key. It opens
//! channels on behalf of clients, wraps every request fragment once per
//! hop, and peels every layer off responses before handing the reassembled
//! payload back to the client.
//!
//! ## Main Functionality
//! - `EntryRegistry::request`: accepts a client datagram `dest(6) ‖ payload`
//! - `EntryRegistry::tick`: emits exactly one packet per channel
//! - `EntryRegistry::handle_response`: peels, replay-checks and reassembles
//! - `EntryRegistry::cleanup_expired`: drops idle channels
//!
//! ## Channel Lifecycle
//! ```text
//! ┌──────────────┐  CONFIRM from exit   ┌─────────────┐
//! │ Initializing │ ───────────────────► │  Confirmed  │
//! │ (emits INIT) │                      │ (emits DATA)│
//! └──────┬───────┘                      └──────┬──────┘
//!        │            idle timeout             │
//!        └──────────────────┬──────────────────┘
//!                           ▼
//!                       (removed)
//! ```
//!
//! ## Request Layering
//! ```text
//! data = fragment (data_fragment_len bytes)
//! hop N:             c_N = ++ctr_N;  data = c_N ‖ seal(k_N, c_N, Request, data)
//! for hop i = N-1..1: c_i = ++ctr_i; data = c_i ‖ E(k_i, c_i, Request, data)
//! header counter = c_1, payload = rest of data, random-padded to 512
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `tick` sends a dummy fragment when nothing is queued, so every
//!   channel emits the same number of packets whatever the client does
//! - Only the innermost (exit) response counter is replay-checked here;
//!   the link layer already rejects replays of the outer packet
//! - The response window has no zero-counter exemption: the first response
//!   (usually the CONFIRM) is checked like any other
//! - Cover traffic keeps the downstream hops alive right up to the moment
//!   a channel expires here, so an expired id is retired, not freed. The
//!   hops would otherwise meet a new INIT under an id they still hold
//!
//! ## Last Modified
//! v0.1.0 - Initial entry channels
//! v0.1.1 - Retired channel ids, stale response cleanup

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use mixnet_common::{AtomicInstant, ChannelId, Counter, Destination, DESTINATION_LEN};
use mixnet_core::crypto::{
    Direction, OnionMessage, OnionPublicKey, SymmetricChannelCipher, SymmetricKey,
};
use mixnet_core::error::CoreError;
use mixnet_core::protocol::{
    dummy_fragment, ChannelPacket, FragmentGenerator, MessageIdAllocator, MessageType,
    MixMessageStore, ReplayWindow, CHANNEL_CTR_START, CTR_PREFIX_LEN, DATA_FRAG_SIZE,
    INIT_FRAG_SIZE, MAX_HOPS, PACKET_SIZE, PAYLOAD_ONION_LEN, REPLAY_WINDOW_SIZE,
    REQUEST_ID_RANGE,
};

use super::{pad_random, random_counter, retired_id_hold, split_counter, RetiredIds};
use crate::error::{NodeError, Result};

// ============================================
// ClientDelivery
// ============================================

/// A reassembled response, ready to go back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDelivery {
    /// Client source address the request came from.
    pub client: SocketAddr,
    /// Raw response payload.
    pub payload: Vec<u8>,
}

// ============================================
// EntryChannel
// ============================================

struct EntryChannel {
    client: SocketAddr,
    destination: Destination,
    hop_keys: Vec<SymmetricKey>,
    request_counters: Vec<Counter>,
    response_window: ReplayWindow,
    pending: VecDeque<FragmentGenerator>,
    message_ids: MessageIdAllocator,
    responses: MixMessageStore,
    confirmed: bool,
    last_interaction: AtomicInstant,
}

impl EntryChannel {
    fn new(client: SocketAddr, destination: Destination, hops: usize) -> Self {
        Self {
            client,
            destination,
            hop_keys: (0..hops).map(|_| SymmetricKey::generate()).collect(),
            request_counters: vec![Counter::new(CHANNEL_CTR_START); hops],
            response_window: ReplayWindow::new(REPLAY_WINDOW_SIZE, CHANNEL_CTR_START),
            pending: VecDeque::new(),
            message_ids: MessageIdAllocator::new(REQUEST_ID_RANGE),
            responses: MixMessageStore::new(),
            confirmed: false,
            last_interaction: AtomicInstant::now(),
        }
    }

    /// Next fragment of the oldest queued request, or a dummy.
    fn next_fragment(&mut self, size: usize) -> Result<Vec<u8>> {
        let Some(generator) = self.pending.front_mut() else {
            return Ok(dummy_fragment(size));
        };

        let fragment = generator.get_fragment(size)?;

        if generator.is_empty() {
            let message_id = generator.message_id();
            self.pending.pop_front();
            self.message_ids.release(message_id);
        }
        Ok(fragment)
    }

    fn init_packet(
        &mut self,
        channel_id: ChannelId,
        hop_public_keys: &[OnionPublicKey],
    ) -> Result<ChannelPacket> {
        let fragment = self.next_fragment(INIT_FRAG_SIZE)?;

        let mut payload = Vec::with_capacity(PAYLOAD_ONION_LEN);
        payload.extend_from_slice(&self.destination.to_bytes());
        payload.extend_from_slice(&fragment);

        let onion = OnionMessage::build(hop_public_keys, &self.hop_keys, &payload)?;
        Ok(ChannelPacket::new(
            channel_id,
            MessageType::ChannelInit,
            random_counter(),
            onion.to_bytes(),
        ))
    }

    fn data_packet(
        &mut self,
        channel_id: ChannelId,
        cipher: &dyn SymmetricChannelCipher,
    ) -> Result<ChannelPacket> {
        let mut data = self.next_fragment(cipher.data_fragment_len())?;
        let innermost = self.hop_keys.len() - 1;

        for (hop, (key, counter)) in self
            .hop_keys
            .iter()
            .zip(self.request_counters.iter_mut())
            .enumerate()
            .rev()
        {
            let ctr = counter.next();
            let body = if hop == innermost {
                cipher.seal(key, ctr, Direction::Request, &data)?
            } else {
                cipher.encrypt(key, ctr, Direction::Request, &data)
            };
            let mut layer = Vec::with_capacity(CTR_PREFIX_LEN + body.len());
            layer.extend_from_slice(&ctr.to_be_bytes());
            layer.extend_from_slice(&body);
            data = layer;
        }

        let (header, rest) = split_counter(&data)?;
        let mut payload = rest.to_vec();
        pad_random(&mut payload, PACKET_SIZE);
        Ok(ChannelPacket::new(
            channel_id,
            MessageType::Data,
            header,
            payload,
        ))
    }

    /// Removes every layer; returns the innermost counter and the fragment.
    fn peel_response(
        &self,
        counter: u64,
        payload: &[u8],
        cipher: &dyn SymmetricChannelCipher,
    ) -> Result<(u64, Vec<u8>)> {
        let Some((last_key, mid_keys)) = self.hop_keys.split_last() else {
            return Err(CoreError::malformed("channel has no hop keys").into());
        };

        let mut counter = counter;
        let mut data = payload.to_vec();
        for key in mid_keys {
            let plain = cipher.decrypt(key, counter, Direction::Response, &data);
            let (inner, rest) = split_counter(&plain)?;
            counter = inner;
            data = rest.to_vec();
        }

        if data.len() < DATA_FRAG_SIZE {
            return Err(CoreError::too_short(DATA_FRAG_SIZE, data.len()).into());
        }
        let fragment = cipher.open(
            last_key,
            counter,
            Direction::Response,
            &data[..DATA_FRAG_SIZE],
        )?;
        Ok((counter, fragment))
    }
}

// ============================================
// EntryRegistry
// ============================================

/// Channel table of an entry node.
pub struct EntryRegistry {
    hop_public_keys: Vec<OnionPublicKey>,
    cipher: Arc<dyn SymmetricChannelCipher>,
    channels: HashMap<ChannelId, EntryChannel>,
    by_client: HashMap<(SocketAddr, Destination), ChannelId>,
    retired: RetiredIds,
    max_channels: usize,
    channel_timeout: Duration,
}

impl EntryRegistry {
    /// Creates an empty table for the path `hop_public_keys`.
    ///
    /// # Errors
    /// `ConfigInvalid` unless there are between 1 and `MAX_HOPS` hop keys.
    pub fn new(
        hop_public_keys: Vec<OnionPublicKey>,
        cipher: Arc<dyn SymmetricChannelCipher>,
        max_channels: usize,
        channel_timeout: Duration,
    ) -> Result<Self> {
        if hop_public_keys.is_empty() || hop_public_keys.len() > MAX_HOPS {
            return Err(NodeError::config_invalid(
                "keys.hop_public_keys",
                format!("need 1..={MAX_HOPS} hops, got {}", hop_public_keys.len()),
            ));
        }

        debug!(
            hops = hop_public_keys.len(),
            cipher = cipher.name(),
            "Entry registry created"
        );

        Ok(Self {
            hop_public_keys,
            cipher,
            channels: HashMap::new(),
            by_client: HashMap::new(),
            retired: RetiredIds::new(retired_id_hold(channel_timeout)),
            max_channels,
            channel_timeout,
        })
    }

    /// Queues a client datagram `dest_ip(4) ‖ dest_port(2) ‖ payload`.
    ///
    /// The channel for `(client, destination)` is created on first use.
    ///
    /// # Errors
    /// - `InvalidClientDatagram` if the destination prefix is missing
    /// - `ChannelLimitReached` if a new channel would exceed the limit
    /// - `Core(MessageIdsExhausted | FragmentTooLarge)` if the payload
    ///   cannot be fragmented
    pub fn request(&mut self, client: SocketAddr, datagram: &[u8]) -> Result<ChannelId> {
        if datagram.len() < DESTINATION_LEN {
            return Err(NodeError::invalid_client_datagram(
                client,
                format!("{} bytes, need a {DESTINATION_LEN}-byte destination", datagram.len()),
            ));
        }
        let (dest_bytes, payload) = datagram.split_at(DESTINATION_LEN);
        let destination = Destination::from_bytes(dest_bytes)?;

        let existing = self.by_client.get(&(client, destination)).copied();
        let channel_id = match existing {
            Some(id) => id,
            None => self.open(client, destination)?,
        };

        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(NodeError::UnknownChannel(channel_id))?;
        channel.last_interaction.touch();

        if payload.is_empty() {
            return Ok(channel_id);
        }

        let message_id = channel.message_ids.allocate()?;
        match FragmentGenerator::new(message_id, payload.to_vec()) {
            Ok(generator) => channel.pending.push_back(generator),
            Err(e) => {
                channel.message_ids.release(message_id);
                return Err(e.into());
            }
        }

        trace!(
            channel_id = %channel_id,
            message_id,
            len = payload.len(),
            "Client request queued"
        );
        Ok(channel_id)
    }

    fn open(&mut self, client: SocketAddr, destination: Destination) -> Result<ChannelId> {
        if self.channels.len() >= self.max_channels {
            return Err(NodeError::ChannelLimitReached {
                limit: self.max_channels,
            });
        }

        let channel_id = ChannelId::random_unused(|id| {
            self.channels.contains_key(&id) || self.retired.contains(id)
        })?;
        self.channels.insert(
            channel_id,
            EntryChannel::new(client, destination, self.hop_public_keys.len()),
        );
        self.by_client.insert((client, destination), channel_id);

        info!(
            channel_id = %channel_id,
            client = %client,
            destination = %destination,
            "Channel created"
        );
        Ok(channel_id)
    }

    /// Emits one packet per channel: INIT until confirmed, DATA afterwards.
    ///
    /// A channel whose packet cannot be built is skipped this round.
    pub fn tick(&mut self) -> Vec<ChannelPacket> {
        let mut packets = Vec::with_capacity(self.channels.len());

        for (channel_id, channel) in &mut self.channels {
            let result = if channel.confirmed {
                channel.data_packet(*channel_id, self.cipher.as_ref())
            } else {
                channel.init_packet(*channel_id, &self.hop_public_keys)
            };

            match result {
                Ok(packet) => packets.push(packet),
                Err(e) => debug!(channel_id = %channel_id, error = %e, "Packet not built"),
            }
        }

        packets
    }

    /// Handles a DATA or CONFIRM packet from the next hop.
    ///
    /// Returns the reassembled payload once a response message completes.
    ///
    /// # Errors
    /// - `UnknownChannel` for an id not in the table
    /// - `UnexpectedMessage` for an INIT
    /// - `Core(ReplayDetected)` for a reused exit counter
    /// - `Core(..)` for malformed fragments
    pub fn handle_response(&mut self, packet: ChannelPacket) -> Result<Option<ClientDelivery>> {
        let channel_id = packet.channel_id;
        if packet.msg_type == MessageType::ChannelInit {
            return Err(NodeError::unexpected(
                channel_id,
                packet.msg_type,
                "INIT on the response path",
            ));
        }

        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(NodeError::UnknownChannel(channel_id))?;

        let (inner_counter, fragment) =
            channel.peel_response(packet.counter, &packet.payload, self.cipher.as_ref())?;
        channel.response_window.check(inner_counter)?;
        channel.last_interaction.touch();

        if packet.msg_type == MessageType::ChannelConfirm {
            if !channel.confirmed {
                channel.confirmed = true;
                info!(channel_id = %channel_id, "Channel confirmed");
            }
            return Ok(None);
        }

        match channel.responses.feed(&fragment) {
            Ok(Some(payload)) => {
                trace!(channel_id = %channel_id, len = payload.len(), "Response complete");
                Ok(Some(ClientDelivery {
                    client: channel.client,
                    payload,
                }))
            }
            Ok(None) => Ok(None),
            Err(CoreError::DummyOrEmptyPayload) => {
                trace!(channel_id = %channel_id, "Dummy response dropped");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes channels idle for longer than the channel timeout.
    ///
    /// Their ids are retired; ids whose hold ended become available again.
    /// Surviving channels drop stale partial responses.
    pub fn cleanup_expired(&mut self) -> Vec<ChannelId> {
        let now = Instant::now();
        self.retired.purge(now);

        let stale: usize = self
            .channels
            .values_mut()
            .map(|channel| channel.responses.cleanup_expired(now))
            .sum();
        if stale > 0 {
            debug!(stale, "Dropped incomplete responses");
        }

        let expired: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, c)| c.last_interaction.has_elapsed(self.channel_timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(channel) = self.channels.remove(id) {
                self.by_client.remove(&(channel.client, channel.destination));
                self.retired.retire(*id, now);
                debug!(channel_id = %id, client = %channel.client, "Channel expired");
            }
        }

        if !expired.is_empty() {
            info!("Cleaned up {} expired channels", expired.len());
        }
        expired
    }

    /// Channel serving `(client, destination)`, if any.
    #[must_use]
    pub fn channel_for(&self, client: SocketAddr, destination: Destination) -> Option<ChannelId> {
        self.by_client.get(&(client, destination)).copied()
    }

    #[must_use]
    pub fn is_confirmed(&self, channel_id: ChannelId) -> bool {
        self.channels.get(&channel_id).is_some_and(|c| c.confirmed)
    }

    /// Number of hops on the configured path.
    #[must_use]
    pub fn hop_count(&self) -> usize {
        self.hop_public_keys.len()
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

impl std::fmt::Debug for EntryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRegistry")
            .field("hops", &self.hop_public_keys.len())
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
    use std::net::Ipv4Addr;

    use mixnet_core::crypto::{CtrChannelCipher, OnionKeyPair};
    use mixnet_core::protocol::{CHANNEL_HEADER_LEN, INIT_PACKET_SIZE};

    fn registry(hops: &[OnionKeyPair]) -> EntryRegistry {
        EntryRegistry::new(
            hops.iter().map(|k| *k.public_key()).collect(),
            Arc::new(CtrChannelCipher::new()),
            16,
            Duration::from_secs(300),
        )
        .unwrap()
    }

    fn hops(n: usize) -> Vec<OnionKeyPair> {
        (0..n).map(|_| OnionKeyPair::generate()).collect()
    }

    fn datagram(dest: Destination, payload: &[u8]) -> Vec<u8> {
        let mut out = dest.to_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_init_message_size() {
        let keys = hops(3);
        let mut entry = registry(&keys);
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let dest = Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456);

        entry.request(client, &datagram(dest, b"hello")).unwrap();
        let packets = entry.tick();
        assert_eq!(packets.len(), 1);

        let init = &packets[0];
        assert_eq!(init.msg_type, MessageType::ChannelInit);
        assert_eq!(init.to_bytes().len(), CHANNEL_HEADER_LEN + INIT_PACKET_SIZE);
        assert_eq!(init.to_bytes().len(), 523);
    }

    #[test]
    fn test_init_recovers_keys_and_destination() {
        let keys = hops(3);
        let mut entry = registry(&keys);
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let dest = Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456);
        entry.request(client, &datagram(dest, b"ping")).unwrap();

        let init = entry.tick().remove(0);
        let mut onion = OnionMessage::from_bytes(&init.payload).unwrap();
        let mut payload = Vec::new();
        for hop in &keys {
            let processed = onion.process(hop).unwrap();
            payload = processed.payload;
            onion = processed.forwarded;
        }

        assert_eq!(Destination::from_bytes(&payload[..DESTINATION_LEN]).unwrap(), dest);
        let mut store = MixMessageStore::new();
        assert_eq!(
            store.feed(&payload[DESTINATION_LEN..]).unwrap(),
            Some(b"ping".to_vec())
        );
    }

    #[test]
    fn test_channel_per_client_destination_pair() {
        let keys = hops(2);
        let mut entry = registry(&keys);
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let other: SocketAddr = "127.0.0.1:12346".parse().unwrap();
        let dest = Destination::new(Ipv4Addr::new(10, 0, 0, 1), 53);
        let dest2 = Destination::new(Ipv4Addr::new(10, 0, 0, 1), 54);

        let a = entry.request(client, &datagram(dest, b"a")).unwrap();
        let b = entry.request(client, &datagram(dest, b"b")).unwrap();
        let c = entry.request(client, &datagram(dest2, b"c")).unwrap();
        let d = entry.request(other, &datagram(dest, b"d")).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(entry.len(), 3);
        assert_eq!(entry.channel_for(client, dest2), Some(c));
        assert_eq!(entry.tick().len(), 3);
    }

    #[test]
    fn test_short_client_datagram_rejected() {
        let mut entry = registry(&hops(1));
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let err = entry.request(client, &[127, 0, 0]).unwrap_err();
        assert!(matches!(err, NodeError::InvalidClientDatagram { .. }));
        assert!(err.is_packet_drop());
        assert!(entry.is_empty());
    }

    #[test]
    fn test_channel_limit() {
        let keys = hops(1);
        let mut entry = EntryRegistry::new(
            vec![*keys[0].public_key()],
            Arc::new(CtrChannelCipher::new()),
            1,
            Duration::from_secs(300),
        )
        .unwrap();
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        entry
            .request(client, &datagram(Destination::new(Ipv4Addr::LOCALHOST, 1), b""))
            .unwrap();
        let err = entry
            .request(client, &datagram(Destination::new(Ipv4Addr::LOCALHOST, 2), b""))
            .unwrap_err();
        assert!(matches!(err, NodeError::ChannelLimitReached { limit: 1 }));
    }

    #[test]
    fn test_response_for_unknown_channel() {
        let mut entry = registry(&hops(2));
        let packet = ChannelPacket::new(
            ChannelId::new(77).unwrap(),
            MessageType::Data,
            1,
            vec![0u8; PACKET_SIZE],
        );
        let err = entry.handle_response(packet).unwrap_err();
        assert!(matches!(err, NodeError::UnknownChannel(_)));
    }

    #[test]
    fn test_init_on_response_path_rejected() {
        let mut entry = registry(&hops(2));
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let id = entry
            .request(client, &datagram(Destination::new(Ipv4Addr::LOCALHOST, 9), b"x"))
            .unwrap();
        let packet = ChannelPacket::new(id, MessageType::ChannelInit, 1, vec![0u8; PACKET_SIZE]);
        assert!(matches!(
            entry.handle_response(packet),
            Err(NodeError::UnexpectedMessage { .. })
        ));
    }

    #[test]
    fn test_new_rejects_bad_path_length() {
        let cipher: Arc<dyn SymmetricChannelCipher> = Arc::new(CtrChannelCipher::new());
        assert!(EntryRegistry::new(Vec::new(), Arc::clone(&cipher), 1, Duration::from_secs(1)).is_err());
        let too_many = hops(MAX_HOPS + 1).iter().map(|k| *k.public_key()).collect();
        assert!(EntryRegistry::new(too_many, cipher, 1, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_cleanup_expired() {
        let mut entry = EntryRegistry::new(
            vec![*OnionKeyPair::generate().public_key()],
            Arc::new(CtrChannelCipher::new()),
            16,
            Duration::ZERO,
        )
        .unwrap();
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let dest = Destination::new(Ipv4Addr::LOCALHOST, 7);
        let id = entry.request(client, &datagram(dest, b"x")).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(entry.cleanup_expired(), vec![id]);
        assert!(entry.is_empty());
        assert_eq!(entry.channel_for(client, dest), None);
        assert!(entry.retired.contains(id));
    }

    #[test]
    fn test_expired_id_not_redrawn_until_released() {
        let mut entry = registry(&hops(1));
        let client: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let dest = Destination::new(Ipv4Addr::LOCALHOST, 7);
        let id = entry.request(client, &datagram(dest, b"x")).unwrap();

        // Every other id is out of reach, so a redraw could only pick `id`.
        let far = Instant::now() + Duration::from_secs(3600);
        for value in 1..=u16::MAX {
            let other = ChannelId::new(value).unwrap();
            if other != id {
                entry.retired.retire_until(other, far);
            }
        }

        entry.channel_timeout = Duration::ZERO;
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(entry.cleanup_expired(), vec![id]);

        // The downstream hops may still hold `id`; it is not handed out.
        let err = entry.request(client, &datagram(dest, b"again")).unwrap_err();
        assert!(matches!(err, NodeError::Common(_)));
        assert!(entry.is_empty());

        // Once the hold has passed the id is free again.
        entry.retired.purge(Instant::now() + Duration::from_secs(601));
        assert_eq!(entry.request(client, &datagram(dest, b"again")).unwrap(), id);
    }
}
