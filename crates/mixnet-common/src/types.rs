// ============================================
// File: crates/mixnet-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers that travel on the wire between hops, so
//! every role encodes them the same way.
//!
//! ## Main Functionality
//! - `ChannelId`: 16-bit per-hop channel identifier (never zero)
//! - `Destination`: IPv4 socket address in its 6-byte wire form
//! - `Counter`: pre-incrementing 64-bit sequence counter
//!
//! ## Main Logical Flow
//! 1. A hop allocates a fresh `ChannelId` that is not in its tables
//! 2. The entry encodes the client's `Destination` into the init onion
//! 3. Each direction of each hop owns a `Counter` for nonces and replay checks
//!
//! ## ⚠️ Important Note for Next Developer
//! - Channel id 0 is never allocated; it is not a valid table key
//! - `Counter::next` increments BEFORE returning, so a counter seeded with
//!   0 emits 1 first. Replay windows are seeded with the same start value
//!   and would reject a 0.
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

// ============================================
// Constants
// ============================================

/// Size of a channel id on the wire.
pub const CHANNEL_ID_SIZE: usize = 2;

/// Size of an encoded destination (IPv4 + port).
pub const DESTINATION_LEN: usize = 6;

/// Size of an encoded counter.
pub const COUNTER_LEN: usize = 8;

/// Random draws attempted before falling back to a linear scan.
const RANDOM_ID_ATTEMPTS: usize = 64;

// ============================================
// ChannelId
// ============================================

/// Identifier of a channel on one link.
///
/// Ids are only meaningful between two neighbouring hops: a mix maps the id
/// it receives from its predecessor onto an id of its own for the successor.
///
/// # Wire Format
/// ```text
/// ┌──────────────────────────┐
/// │  Channel ID (2 bytes BE) │
/// └──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u16);

impl ChannelId {
    /// Creates a channel id, rejecting the reserved value 0.
    #[must_use]
    pub const fn new(value: u16) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Draws a uniformly random id from `1..=65535`.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(1..=u16::MAX))
    }

    /// Draws a random id for which `in_use` returns `false`.
    ///
    /// After a bounded number of random draws the id space is scanned
    /// linearly, so a nearly full table still succeeds.
    ///
    /// # Errors
    /// `ResourceExhausted` when every id is in use.
    pub fn random_unused(in_use: impl Fn(ChannelId) -> bool) -> Result<Self> {
        for _ in 0..RANDOM_ID_ATTEMPTS {
            let id = Self::random();
            if !in_use(id) {
                return Ok(id);
            }
        }

        (1..=u16::MAX)
            .map(Self)
            .find(|id| !in_use(*id))
            .ok_or_else(|| CommonError::resource_exhausted("channel ids", u16::MAX))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Returns the big-endian wire encoding.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; CHANNEL_ID_SIZE] {
        self.0.to_be_bytes()
    }

    /// Parses the big-endian wire encoding.
    ///
    /// # Errors
    /// `InvalidLength` for a slice that is not 2 bytes, `InvalidInput` for 0.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; CHANNEL_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| CommonError::invalid_length(CHANNEL_ID_SIZE, bytes.len()))?;
        Self::new(u16::from_be_bytes(raw))
            .ok_or_else(|| CommonError::invalid_input("channel_id", "must not be zero"))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================
// Destination
// ============================================

/// Final destination of a channel, as carried inside the init onion.
///
/// # Wire Format
/// ```text
/// ┌──────────────────┬────────────────┐
/// │  IPv4 (4 bytes)  │ Port (2 bytes) │
/// └──────────────────┴────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination(SocketAddrV4);

impl Destination {
    /// Creates a destination from an IPv4 address and port.
    #[must_use]
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    /// Returns the IPv4 address.
    #[must_use]
    pub const fn ip(&self) -> &Ipv4Addr {
        self.0.ip()
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.0.port()
    }

    /// Returns the socket address.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }

    /// Returns the 6-byte wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESTINATION_LEN] {
        let mut out = [0u8; DESTINATION_LEN];
        out[..4].copy_from_slice(&self.0.ip().octets());
        out[4..].copy_from_slice(&self.0.port().to_be_bytes());
        out
    }

    /// Parses the first 6 bytes of `bytes`.
    ///
    /// # Errors
    /// `InvalidLength` if fewer than 6 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DESTINATION_LEN {
            return Err(CommonError::invalid_length(DESTINATION_LEN, bytes.len()));
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(Self::new(ip, port))
    }
}

impl TryFrom<SocketAddr> for Destination {
    type Error = CommonError;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(Self(v4)),
            SocketAddr::V6(v6) => Err(CommonError::UnsupportedAddress(v6.to_string())),
        }
    }
}

impl From<SocketAddrV4> for Destination {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================
// Counter
// ============================================

/// Monotonic 64-bit sequence counter.
///
/// Used as the nonce of channel and link encryption and as the value the
/// receiving side feeds into its replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter(u64);

impl Counter {
    /// Creates a counter whose first `next()` returns `start + 1`.
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self(start)
    }

    /// Advances the counter and returns the new value.
    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    /// Returns the last emitted value.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.0
    }
}

// ============================================
// Tests
// ============================================
