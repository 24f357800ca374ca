// ============================================
// File: crates/mixnet-core/src/protocol/fragment.rs
// ============================================
//! # Fragment Codec
//!
//! ## Creation Reason
//! Every channel payload carries exactly one fixed-size fragment, so
//! application payloads of any length are cut into fragments that all have
//! the same length on the wire.
//!
//! ## Main Functionality
//! - `make_fragment` / `parse_fragment`: one fragment, both directions
//! - `FragmentGenerator`: stateful producer over one payload
//! - `MessageIdAllocator`: message ids within the issuer's range
//! - padding length encoding helpers
//!
//! ## Fragment Format
//! ```text
//! ┌────────┬───────┬───────────┬──────────────┬──────────┬─────────┐
//! │ id (1) │ flags │ index (1) │ pad len 1-3B │ payload  │ filler  │
//! │        │  (1)  │ optional  │ optional     │          │         │
//! └────────┴───────┴───────────┴──────────────┴──────────┴─────────┘
//! flags: 0x80 = padding present, 0x40 = last fragment
//! ```
//!
//! - `limit` is the fragment size minus three header bytes. An indexed
//!   fragment has `limit` bytes for padding length and payload.
//! - A single fragment (id 0, no index byte) has `limit + 1`.
//! - The padding length counts every byte after the header that is not
//!   payload, including itself. It is written as `total - n` in `n` 7-bit
//!   groups, most significant first, with the high bit set on the last
//!   byte only.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Filler is random. Consumers MUST use the decoded padding length and
//!   never inspect filler content.
//! - An empty payload is a dummy (cover traffic); `parse_fragment` reports
//!   it as `DummyOrEmptyPayload`
//!
//! ## Last Modified
//! v0.1.0 - Initial fragment codec

use std::collections::HashSet;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CoreError, Result};
use crate::protocol::{DATA_FRAG_SIZE, INIT_FRAG_SIZE, SINGLE_FRAGMENT_ID};

// ============================================
// Constants
// ============================================

/// Size of the message id.
pub const FRAG_ID_SIZE: usize = 1;

/// Size of the flag byte.
pub const FRAG_FLAG_SIZE: usize = 1;

/// Size of the optional index byte.
pub const FRAG_INDEX_SIZE: usize = 1;

/// Header bytes subtracted from a fragment size to obtain its limit.
pub const FRAG_HEADER_SIZE: usize = FRAG_ID_SIZE + FRAG_FLAG_SIZE + FRAG_INDEX_SIZE;

/// Flag: a padding length follows the header.
pub const PADDING_FLAG: u8 = 0b1000_0000;

/// Flag: this is the last fragment of its message.
pub const LAST_FRAG_FLAG: u8 = 0b0100_0000;

/// Highest fragment index a message can use.
pub const MAX_FRAG_INDEX: usize = u8::MAX as usize;

/// Longest padding length encoding accepted.
const MAX_PADDING_LEN_BYTES: usize = 3;

// ============================================
// Padding Length Encoding
// ============================================

/// Number of bytes needed to encode a padding of `padding` bytes.
///
/// The smallest `n >= 1` with `128^n >= padding`; zero for no padding.
#[must_use]
pub fn padding_len_bytes_needed(padding: usize) -> usize {
    if padding == 0 {
        return 0;
    }
    let mut n = 1;
    let mut reach = 128usize;
    while reach < padding {
        reach = reach.saturating_mul(128);
        n += 1;
    }
    n
}

/// Encodes a total padding of `padding` bytes.
#[must_use]
pub fn encode_padding_len(padding: usize) -> Vec<u8> {
    let n = padding_len_bytes_needed(padding);
    let mut value = padding - n;
    let mut out = vec![0u8; n];
    for byte in out.iter_mut().rev() {
        *byte = (value & 0x7F) as u8;
        value >>= 7;
    }
    if let Some(last) = out.last_mut() {
        *last |= 0x80;
    }
    out
}

/// Decodes a padding length from the front of `bytes`.
///
/// Returns `(filler_len, bytes_read)` where `filler_len` excludes the
/// length bytes themselves.
///
/// # Errors
/// `MalformedMessage` if no terminating byte appears within three bytes.
pub fn decode_padding_len(bytes: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    for (i, &byte) in bytes.iter().take(MAX_PADDING_LEN_BYTES).enumerate() {
        value = (value << 7) | usize::from(byte & 0x7F);
        if byte & 0x80 != 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CoreError::malformed("unterminated padding length"))
}

// ============================================
// Single Fragment
// ============================================

/// A parsed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Message id (`SINGLE_FRAGMENT_ID` for single-fragment messages).
    pub message_id: u8,
    /// Last fragment flag.
    pub is_last: bool,
    /// Zero-based fragment index.
    pub index: u8,
    /// Payload without padding.
    pub payload: Vec<u8>,
}

/// Builds one fragment of exactly `limit + FRAG_HEADER_SIZE` bytes.
///
/// Takes as much of `payload` as fits and returns the fragment together
/// with the number of payload bytes consumed.
///
/// There is no `is_last` argument: the last flag is derived, and set exactly
/// when all of `payload` fits. Callers must therefore pass the whole
/// remaining payload, never a pre-cut chunk, or every chunk comes out
/// flagged last. Index 0 with a payload of at most
/// `limit + 1` bytes collapses into a single fragment under
/// `SINGLE_FRAGMENT_ID`.
///
/// # Errors
/// `FragmentTooLarge` if `index` exceeds the maximum fragment index.
pub fn make_fragment(
    message_id: u8,
    index: usize,
    payload: &[u8],
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    if index > MAX_FRAG_INDEX {
        return Err(CoreError::FragmentTooLarge {
            index,
            max: MAX_FRAG_INDEX,
        });
    }

    let single = index == 0 && payload.len() <= limit + 1;
    let capacity = if single { limit + 1 } else { limit };
    let consumed = payload.len().min(capacity);
    let padding = capacity - consumed;

    let mut flags = 0u8;
    if consumed == payload.len() {
        flags |= LAST_FRAG_FLAG;
    }
    if padding > 0 {
        flags |= PADDING_FLAG;
    }

    let mut fragment = Vec::with_capacity(limit + FRAG_HEADER_SIZE);
    if single {
        fragment.push(SINGLE_FRAGMENT_ID);
        fragment.push(flags);
    } else {
        fragment.push(message_id);
        fragment.push(flags);
        // index <= MAX_FRAG_INDEX was checked above
        fragment.push(index as u8);
    }

    let padding_len = encode_padding_len(padding);
    fragment.extend_from_slice(&padding_len);
    fragment.extend_from_slice(&payload[..consumed]);

    let mut filler = vec![0u8; padding - padding_len.len()];
    OsRng.fill_bytes(&mut filler);
    fragment.extend_from_slice(&filler);

    debug_assert_eq!(fragment.len(), limit + FRAG_HEADER_SIZE);
    Ok((fragment, consumed))
}

/// Builds a dummy fragment of `frag_size` bytes that carries no payload.
#[must_use]
pub fn dummy_fragment(frag_size: usize) -> Vec<u8> {
    // an empty payload always collapses to a single fragment at index 0
    match make_fragment(SINGLE_FRAGMENT_ID, 0, &[], frag_size - FRAG_HEADER_SIZE) {
        Ok((fragment, _)) => fragment,
        Err(_) => unreachable!("index 0 is always representable"),
    }
}

/// Parses one fragment.
///
/// # Errors
/// - `DummyOrEmptyPayload` if the fragment carries no payload
/// - `MalformedMessage` / `MessageTooShort` for inconsistent input
pub fn parse_fragment(bytes: &[u8]) -> Result<Fragment> {
    if bytes.len() < FRAG_ID_SIZE + FRAG_FLAG_SIZE {
        return Err(CoreError::too_short(FRAG_ID_SIZE + FRAG_FLAG_SIZE, bytes.len()));
    }

    let message_id = bytes[0];
    let flags = bytes[1];
    let mut rest = &bytes[FRAG_ID_SIZE + FRAG_FLAG_SIZE..];

    let index = if message_id == SINGLE_FRAGMENT_ID {
        0
    } else {
        let (&index, tail) = rest
            .split_first()
            .ok_or_else(|| CoreError::malformed("missing fragment index"))?;
        rest = tail;
        index
    };

    if flags & PADDING_FLAG != 0 {
        let (filler, read) = decode_padding_len(rest)?;
        rest = &rest[read..];
        if filler > rest.len() {
            return Err(CoreError::malformed("padding longer than fragment"));
        }
        rest = &rest[..rest.len() - filler];
    }

    if rest.is_empty() {
        return Err(CoreError::DummyOrEmptyPayload);
    }

    Ok(Fragment {
        message_id,
        is_last: flags & LAST_FRAG_FLAG != 0,
        index,
        payload: rest.to_vec(),
    })
}

// ============================================
// FragmentGenerator
// ============================================

/// Produces the fragments of one payload, one call at a time.
///
/// Each call may use a different fragment size (init or data); the
/// generator only remembers how much payload has been consumed. It is not
/// restartable.
#[derive(Debug)]
pub struct FragmentGenerator {
    message_id: u8,
    payload: Vec<u8>,
    consumed: usize,
    next_index: usize,
}

impl FragmentGenerator {
    /// Creates a generator for `payload` under `message_id`.
    ///
    /// # Errors
    /// `FragmentTooLarge` if the payload could need more fragments than one
    /// message can index, even if every fragment were an init fragment.
    pub fn new(message_id: u8, payload: Vec<u8>) -> Result<Self> {
        let worst_capacity = INIT_FRAG_SIZE - FRAG_HEADER_SIZE;
        let needed = payload.len().div_ceil(worst_capacity);
        if needed > MAX_FRAG_INDEX + 1 {
            return Err(CoreError::FragmentTooLarge {
                index: needed - 1,
                max: MAX_FRAG_INDEX,
            });
        }

        Ok(Self {
            message_id,
            payload,
            consumed: 0,
            next_index: 0,
        })
    }

    /// Next fragment sized for a DATA packet.
    ///
    /// # Errors
    /// `NoFragmentsLeft` once the payload is exhausted.
    pub fn get_data_fragment(&mut self) -> Result<Vec<u8>> {
        self.next_fragment(DATA_FRAG_SIZE)
    }

    /// Next fragment of exactly `frag_size` bytes.
    ///
    /// Sizes below the init fragment size are not accounted for by the
    /// index check in [`new`](Self::new).
    ///
    /// # Errors
    /// `NoFragmentsLeft` once the payload is exhausted, `FragmentTooLarge`
    /// if the index space runs out.
    pub fn get_fragment(&mut self, frag_size: usize) -> Result<Vec<u8>> {
        self.next_fragment(frag_size)
    }

    /// Next fragment sized for the payload onion of an INIT packet.
    ///
    /// # Errors
    /// `NoFragmentsLeft` once the payload is exhausted.
    pub fn get_init_fragment(&mut self) -> Result<Vec<u8>> {
        self.next_fragment(INIT_FRAG_SIZE)
    }

    fn next_fragment(&mut self, frag_size: usize) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(CoreError::NoFragmentsLeft);
        }

        let (fragment, consumed) = make_fragment(
            self.message_id,
            self.next_index,
            &self.payload[self.consumed..],
            frag_size - FRAG_HEADER_SIZE,
        )?;
        self.consumed += consumed;
        self.next_index += 1;
        Ok(fragment)
    }

    /// `true` once every payload byte has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumed >= self.payload.len()
    }

    /// Message id of this generator.
    #[must_use]
    pub const fn message_id(&self) -> u8 {
        self.message_id
    }
}

// ============================================
// MessageIdAllocator
// ============================================

/// Hands out message ids from a fixed range, skipping ids still in use.
#[derive(Debug, Clone)]
pub struct MessageIdAllocator {
    low: u8,
    high: u8,
    next: u8,
    in_use: HashSet<u8>,
}

impl MessageIdAllocator {
    /// Creates an allocator over `low..=high`.
    ///
    /// # Panics
    /// Panics if the range is empty or contains `SINGLE_FRAGMENT_ID`.
    #[must_use]
    pub fn new((low, high): (u8, u8)) -> Self {
        assert!(
            low <= high && low > SINGLE_FRAGMENT_ID,
            "invalid message id range"
        );
        Self {
            low,
            high,
            next: low,
            in_use: HashSet::new(),
        }
    }

    /// Allocates the next free id.
    ///
    /// # Errors
    /// `MessageIdsExhausted` if every id in the range is in use.
    pub fn allocate(&mut self) -> Result<u8> {
        let span = usize::from(self.high - self.low) + 1;
        for _ in 0..span {
            let candidate = self.next;
            self.next = if candidate == self.high {
                self.low
            } else {
                candidate + 1
            };
            if self.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(CoreError::MessageIdsExhausted {
            low: self.low,
            high: self.high,
        })
    }

    /// Returns an id to the pool.
    pub fn release(&mut self, id: u8) {
        self.in_use.remove(&id);
    }

    /// Number of ids currently allocated.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{REQUEST_ID_RANGE, RESPONSE_ID_RANGE};
    use proptest::prelude::*;

    const DATA_LIMIT: usize = DATA_FRAG_SIZE - FRAG_HEADER_SIZE;
    const FRAG_PAYLOAD_SIZE: usize = DATA_FRAG_SIZE - FRAG_ID_SIZE - FRAG_FLAG_SIZE;

    #[test]
    fn test_padding_bytes_needed() {
        assert_eq!(padding_len_bytes_needed(1), 1);
        assert_eq!(padding_len_bytes_needed(128), 1);
        assert_eq!(padding_len_bytes_needed(129), 2);
        assert_eq!(padding_len_bytes_needed(1 << 14), 2);
        assert_eq!(padding_len_bytes_needed((1 << 14) + 1), 3);
        assert_eq!(padding_len_bytes_needed(1 << 21), 3);
    }

    #[test]
    fn test_padding_len_vectors() {
        let vectors: &[(usize, &[u8])] = &[
            (0, &[]),
            (1, &[0b1000_0000]),
            (2, &[0b1000_0001]),
            (127, &[0b1111_1110]),
            (128, &[0b1111_1111]),
            (129, &[0b0000_0000, 0b1111_1111]),
            (130, &[0b0000_0001, 0b1000_0000]),
            (256, &[0b0000_0001, 0b1111_1110]),
            (257, &[0b0000_0001, 0b1111_1111]),
            (258, &[0b0000_0010, 0b1000_0000]),
            (271, &[0b0000_0010, 0b1000_1101]),
            (272, &[0b0000_0010, 0b1000_1110]),
        ];
        for (padding, expected) in vectors {
            assert_eq!(encode_padding_len(*padding), *expected, "padding {padding}");
            if *padding > 0 {
                let (filler, read) = decode_padding_len(expected).unwrap();
                assert_eq!(filler + read, *padding);
            }
        }
    }

    #[test]
    fn test_full_single_fragment() {
        let payload: Vec<u8> = (0..FRAG_PAYLOAD_SIZE).map(|i| i as u8).collect();
        let mut generator = FragmentGenerator::new(5, payload.clone()).unwrap();
        let fragment = generator.get_data_fragment().unwrap();

        assert_eq!(fragment.len(), DATA_FRAG_SIZE);
        assert_eq!(fragment[0], SINGLE_FRAGMENT_ID);
        assert_eq!(fragment[1], 0b0100_0000);
        assert_eq!(&fragment[2..], payload.as_slice());
        assert!(generator.is_empty());
    }

    #[test]
    fn test_padded_single_fragment() {
        let payload = vec![0x55; FRAG_PAYLOAD_SIZE - 1];
        let (fragment, consumed) = make_fragment(9, 0, &payload, DATA_LIMIT).unwrap();

        assert_eq!(consumed, payload.len());
        assert_eq!(fragment[1], 0b1100_0000);
        assert_eq!(fragment[2], 0b1000_0000);
        assert_eq!(&fragment[3..], payload.as_slice());

        let (fragment, _) = make_fragment(9, 0, &[0x42], DATA_LIMIT).unwrap();
        assert_eq!(fragment.len(), DATA_FRAG_SIZE);
        assert_eq!(fragment[1], 0b1100_0000);
        assert_eq!(fragment[4], 0x42);
        assert_eq!(parse_fragment(&fragment).unwrap().payload, vec![0x42]);
    }

    #[test]
    fn test_multi_fragment_indices() {
        let payload = vec![7u8; DATA_LIMIT * 2 + 10];
        let mut generator = FragmentGenerator::new(3, payload).unwrap();

        let mut parsed = Vec::new();
        while !generator.is_empty() {
            parsed.push(parse_fragment(&generator.get_data_fragment().unwrap()).unwrap());
        }

        assert_eq!(parsed.len(), 3);
        for (i, frag) in parsed.iter().enumerate() {
            assert_eq!(frag.message_id, 3);
            assert_eq!(usize::from(frag.index), i);
            assert_eq!(frag.is_last, i == 2);
        }
        assert_eq!(parsed[2].payload.len(), 10);
    }

    #[test]
    fn test_last_flag_follows_remaining_payload() {
        let remaining = vec![9u8; DATA_LIMIT + 5];

        let (first, consumed) = make_fragment(2, 1, &remaining, DATA_LIMIT).unwrap();
        assert_eq!(consumed, DATA_LIMIT);
        assert!(!parse_fragment(&first).unwrap().is_last);

        let (second, consumed) = make_fragment(2, 2, &remaining[consumed..], DATA_LIMIT).unwrap();
        assert_eq!(consumed, 5);
        assert!(parse_fragment(&second).unwrap().is_last);

        // A chunk cut short by the caller is indistinguishable from the tail.
        let (cut, _) = make_fragment(2, 1, &remaining[..10], DATA_LIMIT).unwrap();
        assert!(parse_fragment(&cut).unwrap().is_last);
    }

    #[test]
    fn test_generator_exhaustion() {
        let mut generator = FragmentGenerator::new(1, vec![1, 2, 3]).unwrap();
        generator.get_init_fragment().unwrap();
        assert!(matches!(
            generator.get_data_fragment(),
            Err(CoreError::NoFragmentsLeft)
        ));
    }

    #[test]
    fn test_dummy_fragment_detected() {
        let dummy = dummy_fragment(DATA_FRAG_SIZE);
        assert_eq!(dummy.len(), DATA_FRAG_SIZE);
        assert!(matches!(
            parse_fragment(&dummy),
            Err(CoreError::DummyOrEmptyPayload)
        ));
    }

    #[test]
    fn test_fragment_index_overflow() {
        assert!(matches!(
            make_fragment(1, MAX_FRAG_INDEX + 1, &[1], DATA_LIMIT),
            Err(CoreError::FragmentTooLarge { .. })
        ));

        let too_big = vec![0u8; (INIT_FRAG_SIZE - FRAG_HEADER_SIZE) * 256 + 1];
        assert!(matches!(
            FragmentGenerator::new(1, too_big),
            Err(CoreError::FragmentTooLarge { .. })
        ));
    }

    #[test]
    fn test_message_id_allocator() {
        let mut ids = MessageIdAllocator::new((1, 3));
        assert_eq!(ids.allocate().unwrap(), 1);
        assert_eq!(ids.allocate().unwrap(), 2);
        assert_eq!(ids.allocate().unwrap(), 3);
        assert!(matches!(
            ids.allocate(),
            Err(CoreError::MessageIdsExhausted { low: 1, high: 3 })
        ));

        ids.release(2);
        assert_eq!(ids.in_use(), 2);
        assert_eq!(ids.allocate().unwrap(), 2);

        let mut requests = MessageIdAllocator::new(REQUEST_ID_RANGE);
        let mut responses = MessageIdAllocator::new(RESPONSE_ID_RANGE);
        assert!(requests.allocate().unwrap() <= 127);
        assert!(responses.allocate().unwrap() >= 128);
    }

    proptest! {
        #[test]
        fn prop_fragment_fixed_size(
            payload in proptest::collection::vec(any::<u8>(), 0..1200),
            limit in 3usize..600,
            index in 0usize..=MAX_FRAG_INDEX,
        ) {
            let (fragment, consumed) = make_fragment(17, index, &payload, limit).unwrap();
            prop_assert_eq!(fragment.len(), limit + FRAG_HEADER_SIZE);
            prop_assert!(consumed <= payload.len());
        }

        #[test]
        fn prop_fragment_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 1..1200),
            limit in 3usize..600,
            index in 0usize..=MAX_FRAG_INDEX,
        ) {
            let (fragment, consumed) = make_fragment(17, index, &payload, limit).unwrap();
            let parsed = parse_fragment(&fragment).unwrap();
            prop_assert_eq!(&parsed.payload[..], &payload[..consumed]);
            prop_assert_eq!(parsed.is_last, consumed == payload.len());
            if parsed.message_id != SINGLE_FRAGMENT_ID {
                prop_assert_eq!(usize::from(parsed.index), index);
            }
        }
    }
}
