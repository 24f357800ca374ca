// ============================================
// File: crates/mixnet-node/src/channels/exit.rs
// ============================================
//! # Exit Channels
//!
//! ## Creation Reason
//! The last hop terminates the onion, learns the destination and bridges
//! the channel to it. Reassembled requests go out to the destination;
//! destination messages come back as fragmented response DATA.
//!
//! ## Main Functionality
//! - `ExitRegistry::handle_request`: INIT and DATA from the previous hop
//! - `ExitRegistry::on_connected` / `on_connect_failed`: destination outcome
//! - `ExitRegistry::handle_destination_response`: queues one response
//! - `ExitRegistry::tick`: emits at most one response packet per channel
//! - `ExitRegistry::cleanup_expired`: drops idle channels
//!
//! The registry never touches a socket. It returns `ExitAction`s and the
//! driver performs the connect and the sends.
//!
//! ## Link State
//! ```text
//!  first INIT ──► Connecting { queued } ──connected──► Connected
//!                        │
//!                        └──connect failed──► (removed)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Requests completed while connecting are queued and handed over by
//!   `on_connected`, in arrival order
//! - CONFIRM goes out once per channel, on the first successful connect
//! - Dummy fragments end here; they never reach the destination
//! - Responses are paced: `tick` releases one fragment per channel, never a
//!   whole message at once. The batching stages downstream reorder packets
//!   of one channel only within a batch, and a burst of a whole message
//!   would let later counters overtake earlier ones by more than the replay
//!   window tolerates
//! - A response message id stays allocated until its last fragment left,
//!   so ids are reused round-robin only after a full cycle
//! - Only request traffic keeps a channel alive. A destination that keeps
//!   talking does not pin a channel the entry has abandoned
//! - The link MAC authenticates the link header, not the channel payload.
//!   A repeated INIT corrupted in transit therefore recovers a different
//!   key and trips the key assertion in `handle_init`, same as a hop that
//!   derives keys differently
//!
//! ## Last Modified
//! v0.1.0 - Initial exit channels
//! v0.1.1 - Paced responses, request-only liveness

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use mixnet_common::{AtomicInstant, ChannelId, Counter, Destination, DESTINATION_LEN};
use mixnet_core::crypto::{
    Direction, OnionKeyPair, OnionMessage, SymmetricChannelCipher, SymmetricKey,
};
use mixnet_core::error::CoreError;
use mixnet_core::protocol::{
    dummy_fragment, ChannelPacket, FragmentGenerator, MessageIdAllocator, MessageType,
    MixMessageStore, ReplayWindow, CHANNEL_CTR_START, DATA_FRAG_SIZE, INIT_FRAG_SIZE,
    PACKET_SIZE, REPLAY_WINDOW_SIZE, RESPONSE_ID_RANGE,
};

use super::pad_random;
use crate::error::{NodeError, Result};

// ============================================
// Actions
// ============================================

/// Work the driver must do after a request packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitAction {
    /// A new channel needs a link to its destination.
    Connect {
        channel_id: ChannelId,
        destination: Destination,
    },
    /// A complete request for an already connected channel.
    Deliver {
        channel_id: ChannelId,
        payload: Vec<u8>,
    },
}

/// Result of a successful destination connect.
#[derive(Debug)]
pub struct Established {
    /// CONFIRM for the response path; only on the first connect.
    pub confirm: Option<ChannelPacket>,
    /// Requests that completed while the connect was in flight.
    pub queued: Vec<Vec<u8>>,
}

// ============================================
// ExitChannel
// ============================================

#[derive(Debug)]
enum LinkState {
    Connecting { queued: Vec<Vec<u8>> },
    Connected,
}

struct ExitChannel {
    key: SymmetricKey,
    destination: Destination,
    request_window: ReplayWindow,
    response_counter: Counter,
    requests: MixMessageStore,
    responses: VecDeque<FragmentGenerator>,
    link: LinkState,
    confirm_sent: bool,
    message_ids: MessageIdAllocator,
    last_interaction: AtomicInstant,
}

impl ExitChannel {
    fn new(key: SymmetricKey, destination: Destination) -> Self {
        Self {
            key,
            destination,
            request_window: ReplayWindow::new(REPLAY_WINDOW_SIZE, CHANNEL_CTR_START),
            response_counter: Counter::new(CHANNEL_CTR_START),
            requests: MixMessageStore::new(),
            responses: VecDeque::new(),
            link: LinkState::Connecting { queued: Vec::new() },
            confirm_sent: false,
            message_ids: MessageIdAllocator::new(RESPONSE_ID_RANGE),
            last_interaction: AtomicInstant::now(),
        }
    }

    /// Feeds one request fragment; returns a completed message to deliver.
    fn feed(&mut self, fragment: &[u8]) -> Result<Option<Vec<u8>>> {
        let message = match self.requests.feed(fragment) {
            Ok(Some(message)) => message,
            Ok(None) | Err(CoreError::DummyOrEmptyPayload) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match &mut self.link {
            LinkState::Connecting { queued } => {
                queued.push(message);
                Ok(None)
            }
            LinkState::Connected => Ok(Some(message)),
        }
    }

    /// Next fragment of the oldest queued response, if any.
    fn next_response_fragment(&mut self, size: usize) -> Result<Option<Vec<u8>>> {
        let Some(generator) = self.responses.front_mut() else {
            return Ok(None);
        };
        let fragment = generator.get_fragment(size)?;

        if generator.is_empty() {
            let message_id = generator.message_id();
            self.responses.pop_front();
            self.message_ids.release(message_id);
        }
        Ok(Some(fragment))
    }

    /// Encrypts one fragment as a response packet.
    fn response_packet(
        &mut self,
        channel_id: ChannelId,
        msg_type: MessageType,
        fragment: &[u8],
        cipher: &dyn SymmetricChannelCipher,
    ) -> Result<ChannelPacket> {
        let counter = self.response_counter.next();
        let mut payload = cipher.seal(&self.key, counter, Direction::Response, fragment)?;
        pad_random(&mut payload, PACKET_SIZE);
        Ok(ChannelPacket::new(channel_id, msg_type, counter, payload))
    }
}

// ============================================
// ExitRegistry
// ============================================

/// Channel table of the last hop.
pub struct ExitRegistry {
    onion_key: OnionKeyPair,
    cipher: Arc<dyn SymmetricChannelCipher>,
    channels: HashMap<ChannelId, ExitChannel>,
    max_channels: usize,
    channel_timeout: Duration,
}

impl ExitRegistry {
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
            channels: HashMap::new(),
            max_channels,
            channel_timeout,
        }
    }

    /// Handles a packet from the previous hop.
    ///
    /// # Errors
    /// - `Core(MalformedOnionMessage)` for an unreadable INIT
    /// - `Core(ReplayDetected)` for a reused DATA counter
    /// - `UnknownChannel` for DATA without a prior INIT
    /// - `UnexpectedMessage` for a CONFIRM
    /// - `ChannelLimitReached` if a new channel would exceed the limit
    ///
    /// # Panics
    /// Panics if a repeated INIT recovers a different key.
    pub fn handle_request(&mut self, packet: ChannelPacket) -> Result<Option<ExitAction>> {
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

    fn handle_init(&mut self, packet: ChannelPacket) -> Result<Option<ExitAction>> {
        let channel_id = packet.channel_id;
        let onion = OnionMessage::from_bytes(&packet.payload)?;
        let processed = onion.process(&self.onion_key)?;

        if processed.payload.len() < DESTINATION_LEN + INIT_FRAG_SIZE {
            return Err(CoreError::malformed_onion(format!(
                "payload onion of {} bytes",
                processed.payload.len()
            ))
            .into());
        }
        let (dest_bytes, fragment) = processed.payload.split_at(DESTINATION_LEN);
        let fragment = &fragment[..INIT_FRAG_SIZE];

        if let Some(channel) = self.channels.get_mut(&channel_id) {
            assert_eq!(
                channel.key, processed.channel_key,
                "repeated INIT on channel {channel_id} recovered a different key"
            );
            channel.last_interaction.touch();
            trace!(channel_id = %channel_id, "Repeated INIT");
            return Ok(channel
                .feed(fragment)?
                .map(|payload| ExitAction::Deliver {
                    channel_id,
                    payload,
                }));
        }

        if self.channels.len() >= self.max_channels {
            return Err(NodeError::ChannelLimitReached {
                limit: self.max_channels,
            });
        }

        let destination = Destination::from_bytes(dest_bytes)?;
        let mut channel = ExitChannel::new(processed.channel_key, destination);
        channel.feed(fragment)?;
        self.channels.insert(channel_id, channel);

        info!(channel_id = %channel_id, destination = %destination, "Channel created");
        Ok(Some(ExitAction::Connect {
            channel_id,
            destination,
        }))
    }

    fn handle_data(&mut self, packet: ChannelPacket) -> Result<Option<ExitAction>> {
        let channel_id = packet.channel_id;
        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(NodeError::UnknownChannel(channel_id))?;

        if packet.payload.len() < DATA_FRAG_SIZE {
            return Err(CoreError::too_short(DATA_FRAG_SIZE, packet.payload.len()).into());
        }
        // Authenticate before the counter takes a window slot.
        let fragment = self.cipher.open(
            &channel.key,
            packet.counter,
            Direction::Request,
            &packet.payload[..DATA_FRAG_SIZE],
        )?;
        channel.request_window.check(packet.counter)?;
        channel.last_interaction.touch();

        Ok(channel
            .feed(&fragment)?
            .map(|payload| ExitAction::Deliver {
                channel_id,
                payload,
            }))
    }

    /// Marks the destination link of `channel_id` as up.
    ///
    /// Returns `None` if the channel is gone, for example evicted while the
    /// connect was in flight. A CONFIRM that cannot be sealed is logged and
    /// left out.
    pub fn on_connected(&mut self, channel_id: ChannelId) -> Option<Established> {
        let cipher = Arc::clone(&self.cipher);
        let channel = self.channels.get_mut(&channel_id)?;

        let queued = match std::mem::replace(&mut channel.link, LinkState::Connected) {
            LinkState::Connecting { queued } => queued,
            LinkState::Connected => Vec::new(),
        };

        let confirm = if channel.confirm_sent {
            None
        } else {
            channel.confirm_sent = true;
            info!(channel_id = %channel_id, destination = %channel.destination, "Channel confirmed");
            match channel.response_packet(
                channel_id,
                MessageType::ChannelConfirm,
                &dummy_fragment(cipher.data_fragment_len()),
                cipher.as_ref(),
            ) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!(channel_id = %channel_id, error = %e, "CONFIRM not built");
                    None
                }
            }
        };

        Some(Established { confirm, queued })
    }

    /// Tears down a channel whose destination could not be reached.
    ///
    /// Returns `true` if the channel existed.
    pub fn on_connect_failed(&mut self, channel_id: ChannelId) -> bool {
        let removed = self.channels.remove(&channel_id);
        if let Some(channel) = &removed {
            info!(
                channel_id = %channel_id,
                destination = %channel.destination,
                "Channel removed after connect failure"
            );
        }
        removed.is_some()
    }

    /// Queues one destination message for the response path.
    ///
    /// The fragments go out through [`tick`](Self::tick). An empty message
    /// queues nothing. Does not count as channel activity.
    ///
    /// # Errors
    /// - `UnknownChannel` if the channel is gone
    /// - `Core(MessageIdsExhausted | FragmentTooLarge)` if the message
    ///   cannot be queued
    pub fn handle_destination_response(
        &mut self,
        channel_id: ChannelId,
        message: &[u8],
    ) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(NodeError::UnknownChannel(channel_id))?;

        if message.is_empty() {
            return Ok(());
        }

        let message_id = channel.message_ids.allocate()?;
        match FragmentGenerator::new(message_id, message.to_vec()) {
            Ok(generator) => channel.responses.push_back(generator),
            Err(e) => {
                channel.message_ids.release(message_id);
                return Err(e.into());
            }
        }

        trace!(
            channel_id = %channel_id,
            message_id,
            len = message.len(),
            "Destination response queued"
        );
        Ok(())
    }

    /// Emits the next response fragment of every channel with one queued.
    ///
    /// Channels without queued responses stay silent. A channel whose
    /// packet cannot be built is skipped this round.
    pub fn tick(&mut self) -> Vec<ChannelPacket> {
        let cipher = Arc::clone(&self.cipher);
        let mut packets = Vec::new();

        let size = cipher.data_fragment_len();

        for (channel_id, channel) in &mut self.channels {
            let packet = channel
                .next_response_fragment(size)
                .and_then(|fragment| match fragment {
                    Some(fragment) => channel
                        .response_packet(*channel_id, MessageType::Data, &fragment, cipher.as_ref())
                        .map(Some),
                    None => Ok(None),
                });
            match packet {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => {}
                Err(e) => debug!(channel_id = %channel_id, error = %e, "Response not built"),
            }
        }

        packets
    }

    /// Number of response messages still waiting to be sent.
    #[must_use]
    pub fn pending_responses(&self, channel_id: ChannelId) -> usize {
        self.channels
            .get(&channel_id)
            .map_or(0, |channel| channel.responses.len())
    }

    /// Removes a channel, for example after its destination link closed.
    pub fn remove(&mut self, channel_id: ChannelId) -> bool {
        self.channels.remove(&channel_id).is_some()
    }

    /// Removes channels idle for longer than the channel timeout and drops
    /// stale partial requests of the remaining ones.
    pub fn cleanup_expired(&mut self) -> Vec<ChannelId> {
        let now = Instant::now();
        let stale: usize = self
            .channels
            .values_mut()
            .map(|channel| channel.requests.cleanup_expired(now))
            .sum();
        if stale > 0 {
            debug!(stale, "Dropped incomplete requests");
        }

        let expired: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, c)| c.last_interaction.has_elapsed(self.channel_timeout))
            .map(|(id, _)| *id)
            .collect();

        for channel_id in &expired {
            self.channels.remove(channel_id);
            debug!(channel_id = %channel_id, "Channel expired");
        }

        if !expired.is_empty() {
            info!("Cleaned up {} expired channels", expired.len());
        }
        expired
    }

    #[must_use]
    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
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

impl std::fmt::Debug for ExitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitRegistry")
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

    use std::net::Ipv4Addr;

    use mixnet_core::crypto::{CtrChannelCipher, GROUP_ELEMENT_LEN};
    use mixnet_core::protocol::parse_fragment;
    use mixnet_transport::MockConnector;

    use crate::services::destination::{connect_destination, DestinationEvent};

    fn destination() -> Destination {
        Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456)
    }

    struct Fixture {
        exit: ExitRegistry,
        key: SymmetricKey,
        channel_id: ChannelId,
    }

    impl Fixture {
        fn new() -> Self {
            let onion_key = OnionKeyPair::generate();
            let public = *onion_key.public_key();
            let mut exit = ExitRegistry::new(
                onion_key,
                Arc::new(CtrChannelCipher::new()),
                8,
                Duration::from_secs(300),
            );

            let key = SymmetricKey::generate();
            let channel_id = ChannelId::new(77).unwrap();
            let action = exit
                .handle_request(Self::init(public, &key, channel_id))
                .unwrap();
            assert_eq!(
                action,
                Some(ExitAction::Connect {
                    channel_id,
                    destination: destination(),
                })
            );
            Self {
                exit,
                key,
                channel_id,
            }
        }

        fn init(
            public: mixnet_core::crypto::OnionPublicKey,
            key: &SymmetricKey,
            channel_id: ChannelId,
        ) -> ChannelPacket {
            let mut payload = destination().to_bytes().to_vec();
            payload.extend_from_slice(&dummy_fragment(INIT_FRAG_SIZE));
            let onion = OnionMessage::build(&[public], std::slice::from_ref(key), &payload).unwrap();
            ChannelPacket::new(channel_id, MessageType::ChannelInit, 3, onion.to_bytes())
        }

        fn data(&self, counter: u64, message: &[u8]) -> ChannelPacket {
            let mut generator = FragmentGenerator::new(1, message.to_vec()).unwrap();
            let fragment = generator.get_data_fragment().unwrap();
            let cipher = CtrChannelCipher::new();
            let mut payload = cipher.encrypt(&self.key, counter, Direction::Request, &fragment);
            pad_random(&mut payload, PACKET_SIZE);
            ChannelPacket::new(self.channel_id, MessageType::Data, counter, payload)
        }
    }

    #[test]
    fn test_deliver_after_connect() {
        let mut f = Fixture::new();
        f.exit.on_connected(f.channel_id).unwrap();

        let action = f.exit.handle_request(f.data(1, b"hello")).unwrap();
        assert_eq!(
            action,
            Some(ExitAction::Deliver {
                channel_id: f.channel_id,
                payload: b"hello".to_vec(),
            })
        );

        let err = f.exit.handle_request(f.data(1, b"hello")).unwrap_err();
        assert!(err.is_suspicious());
    }

    #[test]
    fn test_confirm_is_encrypted_dummy() {
        let mut f = Fixture::new();
        let confirm = f.exit.on_connected(f.channel_id).unwrap().confirm.unwrap();
        assert_eq!(confirm.counter, 1);
        assert_eq!(confirm.payload.len(), PACKET_SIZE);

        let cipher = CtrChannelCipher::new();
        let fragment = cipher.decrypt(
            &f.key,
            confirm.counter,
            Direction::Response,
            &confirm.payload[..DATA_FRAG_SIZE],
        );
        assert!(matches!(
            parse_fragment(&fragment),
            Err(CoreError::DummyOrEmptyPayload)
        ));
    }

    fn drain_responses(f: &mut Fixture) -> Vec<ChannelPacket> {
        let mut packets = Vec::new();
        loop {
            let mut round = f.exit.tick();
            assert!(round.len() <= 1, "more than one packet per channel per tick");
            match round.pop() {
                Some(packet) => packets.push(packet),
                None => return packets,
            }
        }
    }

    #[test]
    fn test_response_fragments_use_response_ids() {
        let mut f = Fixture::new();
        f.exit.on_connected(f.channel_id);
        let message = vec![7u8; 2000];
        f.exit.handle_destination_response(f.channel_id, &message).unwrap();
        assert_eq!(f.exit.pending_responses(f.channel_id), 1);

        let packets = drain_responses(&mut f);
        assert!(packets.len() > 1);
        assert_eq!(f.exit.pending_responses(f.channel_id), 0);

        let cipher = CtrChannelCipher::new();
        let mut store = MixMessageStore::new();
        let mut assembled = None;
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.counter, i as u64 + 2);
            assert_eq!(packet.msg_type, MessageType::Data);
            let fragment = cipher.decrypt(
                &f.key,
                packet.counter,
                Direction::Response,
                &packet.payload[..DATA_FRAG_SIZE],
            );
            let parsed = parse_fragment(&fragment).unwrap();
            assert!(parsed.message_id >= RESPONSE_ID_RANGE.0);
            assembled = store.feed(&fragment).unwrap().or(assembled);
        }
        assert_eq!(assembled.unwrap(), message);

        f.exit.handle_destination_response(f.channel_id, b"").unwrap();
        assert!(f.exit.tick().is_empty());
    }

    #[test]
    fn test_response_message_id_held_until_sent() {
        let mut f = Fixture::new();
        f.exit.on_connected(f.channel_id);
        f.exit.handle_destination_response(f.channel_id, &[1u8; 1500]).unwrap();
        f.exit.handle_destination_response(f.channel_id, &[2u8; 1500]).unwrap();

        let channel = &f.exit.channels[&f.channel_id];
        assert_eq!(channel.message_ids.in_use(), 2);

        let packets = drain_responses(&mut f);
        assert_eq!(packets.len(), 8);
        assert_eq!(f.exit.channels[&f.channel_id].message_ids.in_use(), 0);

        // Both messages used distinct ids even though the first one finished.
        let cipher = CtrChannelCipher::new();
        let ids: std::collections::BTreeSet<u8> = packets
            .iter()
            .map(|packet| {
                let fragment = cipher.decrypt(
                    &f.key,
                    packet.counter,
                    Direction::Response,
                    &packet.payload[..DATA_FRAG_SIZE],
                );
                parse_fragment(&fragment).unwrap().message_id
            })
            .collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_responses_do_not_keep_channel_alive() {
        let mut f = Fixture::new();
        f.exit.on_connected(f.channel_id);
        f.exit.channel_timeout = Duration::from_millis(20);

        std::thread::sleep(Duration::from_millis(30));
        f.exit.handle_destination_response(f.channel_id, b"still talking").unwrap();
        assert_eq!(f.exit.tick().len(), 1);

        assert_eq!(f.exit.cleanup_expired(), vec![f.channel_id]);
    }

    #[test]
    fn test_repeated_init_same_key() {
        let mut f = Fixture::new();
        let public = *f.exit.onion_key.public_key();
        let again = Fixture::init(public, &f.key, f.channel_id);
        assert_eq!(f.exit.handle_request(again).unwrap(), None);
        assert_eq!(f.exit.len(), 1);
    }

    #[test]
    #[should_panic(expected = "different key")]
    fn test_repeated_init_different_key_panics() {
        let mut f = Fixture::new();
        let public = *f.exit.onion_key.public_key();
        let other = Fixture::init(public, &SymmetricKey::generate(), f.channel_id);
        let _ = f.exit.handle_request(other);
    }

    #[test]
    #[should_panic(expected = "different key")]
    fn test_corrupted_repeated_init_panics() {
        let mut f = Fixture::new();
        let public = *f.exit.onion_key.public_key();
        let mut again = Fixture::init(public, &f.key, f.channel_id);
        // The link MAC never covered this byte: first byte of the key onion.
        again.payload[GROUP_ELEMENT_LEN] ^= 0x01;
        let _ = f.exit.handle_request(again);
    }

    #[test]
    fn test_unexpected_and_unknown() {
        let mut f = Fixture::new();
        let mut confirm = f.data(1, b"x");
        confirm.msg_type = MessageType::ChannelConfirm;
        assert!(matches!(
            f.exit.handle_request(confirm),
            Err(NodeError::UnexpectedMessage { .. })
        ));

        let mut stray = f.data(1, b"x");
        stray.channel_id = ChannelId::new(5).unwrap();
        assert!(matches!(
            f.exit.handle_request(stray),
            Err(NodeError::UnknownChannel(_))
        ));
        assert!(f.exit.on_connected(ChannelId::new(5).unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_removes_channel() {
        let mut f = Fixture::new();
        let connector = Arc::new(MockConnector::refusing());

        let event = connect_destination(connector.clone(), f.channel_id, destination()).await;
        match event {
            DestinationEvent::ConnectFailed { channel_id, error } => {
                assert_eq!(channel_id, f.channel_id);
                assert!(error.is_channel_fatal());
                assert!(f.exit.on_connect_failed(channel_id));
            }
            other => panic!("expected connect failure, got {other:?}"),
        }
        assert_eq!(connector.connect_attempts(), vec![(f.channel_id, destination())]);

        assert!(!f.exit.contains(f.channel_id));
        assert!(f.exit.on_connected(f.channel_id).is_none());
        assert!(matches!(
            f.exit.handle_request(f.data(1, b"late")),
            Err(NodeError::UnknownChannel(_))
        ));
        assert!(matches!(
            f.exit.handle_destination_response(f.channel_id, b"late"),
            Err(NodeError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_cleanup_expired() {
        let mut f = Fixture::new();
        f.exit.channel_timeout = Duration::ZERO;
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(f.exit.cleanup_expired(), vec![f.channel_id]);
        assert!(f.exit.is_empty());
    }
}
