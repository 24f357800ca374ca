// ============================================
// File: crates/mixnet-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the fixed-size wire formats every hop must agree on
//! byte-for-byte, plus the counter and fragment bookkeeping around them.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`packet`]: Channel packet codec and message types
//! - [`replay`]: Sliding replay window over accepted counters
//! - [`fragment`]: Fixed-size fragmentation with self-describing padding
//! - [`message`]: Reassembly of fragments into payloads
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Channel packet (523 bytes)                                 │
//! │  chan_id(2) │ type(1) │ counter(8) │ payload(512)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  INIT payload:  α(32) │ key onion(96) │ payload onion(384)  │
//! │  DATA payload:  counters + encrypted fragment(496) + filler │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Big-endian byte order for all integers
//! - Every channel payload is exactly `PACKET_SIZE` bytes at every hop
//!
//! ## ⚠️ Important Note for Next Developer
//! - The size constants below are derived from each other; change
//!   `MAX_HOPS` and every hop must be redeployed together
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod fragment;
pub mod message;
pub mod packet;
pub mod replay;

// Re-export primary types
pub use fragment::{
    dummy_fragment, make_fragment, parse_fragment, Fragment, FragmentGenerator, MessageIdAllocator,
};
pub use message::{FragmentFit, MixMessage, MixMessageStore};
pub use packet::{ChannelPacket, Codec, MessageType, PacketCodec};
pub use replay::ReplayWindow;

pub use mixnet_common::types::{CHANNEL_ID_SIZE, DESTINATION_LEN};

use crate::crypto::{GROUP_ELEMENT_LEN, SYM_KEY_LEN};

// ============================================
// Constants
// ============================================

/// Size of the message type flag.
pub const FLAG_LEN: usize = 1;

/// Size of every counter on the wire.
pub const CTR_PREFIX_LEN: usize = 8;

/// Zero bytes that complete the link header.
pub const RESERVED_LEN: usize = 6;

/// Authenticated link header: channel id, counter, type, reserved.
pub const LINK_HEADER_LEN: usize = CHANNEL_ID_SIZE + CTR_PREFIX_LEN + FLAG_LEN + RESERVED_LEN;

/// Poly1305 tag following the link header.
pub const LINK_MAC_LEN: usize = 16;

/// Capacity of every replay window.
pub const REPLAY_WINDOW_SIZE: usize = 10;

/// Seed of every counter and replay window.
pub const CHANNEL_CTR_START: u64 = 0;

/// Number of mixes in a path.
pub const MAX_HOPS: usize = 3;

/// Fixed channel payload size.
pub const PACKET_SIZE: usize = 512;

/// Fragment size inside a DATA payload.
pub const DATA_FRAG_SIZE: usize = PACKET_SIZE - (MAX_HOPS - 1) * CTR_PREFIX_LEN;

/// Size of the channel-key onion.
pub const KEY_ONION_LEN: usize = MAX_HOPS * SYM_KEY_LEN;

/// Fragment size inside an INIT payload.
pub const INIT_FRAG_SIZE: usize = PACKET_SIZE - GROUP_ELEMENT_LEN - KEY_ONION_LEN - DESTINATION_LEN;

/// Size of the payload onion (destination and first fragment).
pub const PAYLOAD_ONION_LEN: usize = DESTINATION_LEN + INIT_FRAG_SIZE;

/// Size of a complete onion init message.
pub const INIT_PACKET_SIZE: usize = GROUP_ELEMENT_LEN + KEY_ONION_LEN + PAYLOAD_ONION_LEN;

/// Channel packet header: channel id, type, counter.
pub const CHANNEL_HEADER_LEN: usize = CHANNEL_ID_SIZE + FLAG_LEN + CTR_PREFIX_LEN;

/// Link overhead added on top of the channel payload.
pub const LINK_OVERHEAD: usize = CTR_PREFIX_LEN + LINK_HEADER_LEN + LINK_MAC_LEN;

/// Message id reserved for payloads that fit one fragment.
pub const SINGLE_FRAGMENT_ID: u8 = 0;

/// Message ids issued by the entry for requests.
pub const REQUEST_ID_RANGE: (u8, u8) = (1, 127);

/// Message ids issued by the exit for responses.
pub const RESPONSE_ID_RANGE: (u8, u8) = (128, 255);

/// Largest batch threshold that keeps every replay window satisfied.
///
/// A batching stage lets at most `threshold - 1` packets of the same channel
/// with larger counters overtake a packet. Across `MAX_HOPS` stages that
/// must stay below the window capacity.
pub const MAX_BATCH_THRESHOLD: usize = 1 + (REPLAY_WINDOW_SIZE - 1) / MAX_HOPS;

/// Seconds an incomplete message may wait for its missing fragments.
pub const REASSEMBLY_TIMEOUT_SECS: u64 = 120;

/// Incomplete messages one channel direction may hold at once.
pub const MAX_PENDING_REASSEMBLIES: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_constants() {
        assert_eq!(LINK_HEADER_LEN, 17);
        assert_eq!(DATA_FRAG_SIZE, 496);
        assert_eq!(INIT_FRAG_SIZE, 378);
        assert_eq!(INIT_PACKET_SIZE, PACKET_SIZE);
        assert_eq!(CHANNEL_HEADER_LEN + INIT_PACKET_SIZE, 523);
        assert_eq!(MAX_BATCH_THRESHOLD, 4);
        assert!((MAX_BATCH_THRESHOLD - 1) * MAX_HOPS < REPLAY_WINDOW_SIZE);
    }
}
