// ============================================
// File: crates/mixnet-core/src/protocol/packet.rs
// ============================================
//! # Channel Packet Codec
//!
//! ## Creation Reason
//! The channel state machines exchange `ChannelPacket`s; the link layer
//! wraps and unwraps them for the wire. This module owns their layout.
//!
//! ## Main Functionality
//! - `MessageType`: DATA / CHAN_INIT / CHAN_CONFIRM flag
//! - `ChannelPacket`: channel id, type, counter and fixed-size payload
//! - `Codec` trait and `PacketCodec` implementation
//!
//! ## Wire Format
//! ```text
//! ┌──────────────┬──────────┬──────────────┬─────────────────────┐
//! │ chan_id (2)  │ type (1) │ counter (8)  │ payload (512)       │
//! └──────────────┴──────────┴──────────────┴─────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The payload is NOT length-checked here; the state machines enforce
//!   `PACKET_SIZE` because they know which role they play
//!
//! ## Last Modified
//! v0.1.0 - Initial packet codec

use bytes::{Buf, BufMut, Bytes, BytesMut};

use mixnet_common::ChannelId;

use crate::error::{CoreError, Result};
use crate::protocol::{CHANNEL_HEADER_LEN, CHANNEL_ID_SIZE};

// ============================================
// MessageType
// ============================================

/// Message type flag carried in every channel packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Fragment of application data.
    Data = 0x01,
    /// Onion init message establishing the channel.
    ChannelInit = 0x02,
    /// Confirmation from the exit that the destination is reachable.
    ChannelConfirm = 0x03,
}

impl MessageType {
    /// Converts a byte to a `MessageType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::ChannelInit),
            0x03 => Some(Self::ChannelConfirm),
            _ => None,
        }
    }

    /// Converts the `MessageType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_byte(value).ok_or(CoreError::UnknownMessageType(value))
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.as_byte()
    }
}

// ============================================
// ChannelPacket
// ============================================

/// One channel-layer packet between two adjacent hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPacket {
    /// Channel id on this link.
    pub channel_id: ChannelId,
    /// Message type.
    pub msg_type: MessageType,
    /// Channel counter of the outermost layer (random for INIT).
    pub counter: u64,
    /// Fixed-size channel payload.
    pub payload: Vec<u8>,
}

impl ChannelPacket {
    /// Creates a packet.
    #[must_use]
    pub fn new(channel_id: ChannelId, msg_type: MessageType, counter: u64, payload: Vec<u8>) -> Self {
        Self {
            channel_id,
            msg_type,
            counter,
            payload,
        }
    }

    /// Encoded length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        CHANNEL_HEADER_LEN + self.payload.len()
    }

    /// Encodes into a fresh vector.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        PacketCodec.encode(self, &mut buf);
        buf.to_vec()
    }

    /// Decodes from a byte slice.
    ///
    /// # Errors
    /// See [`PacketCodec::decode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        PacketCodec.decode(&mut Bytes::copy_from_slice(bytes))
    }
}

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding protocol messages.
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a message from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes do not form a valid message.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

/// Codec for [`ChannelPacket`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Codec<ChannelPacket> for PacketCodec {
    fn encode(&self, msg: &ChannelPacket, buf: &mut BytesMut) {
        buf.reserve(msg.encoded_len());
        buf.put_slice(&msg.channel_id.to_bytes());
        buf.put_u8(msg.msg_type.as_byte());
        buf.put_u64(msg.counter);
        buf.put_slice(&msg.payload);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<ChannelPacket> {
        if buf.len() < CHANNEL_HEADER_LEN {
            return Err(CoreError::too_short(CHANNEL_HEADER_LEN, buf.len()));
        }

        let channel_id = ChannelId::from_bytes(&buf.split_to(CHANNEL_ID_SIZE))?;
        let msg_type = MessageType::try_from(buf.get_u8())?;
        let counter = buf.get_u64();
        let payload = buf.to_vec();

        Ok(ChannelPacket {
            channel_id,
            msg_type,
            counter,
            payload,
        })
    }
}

// ============================================
// Tests
// ============================================
