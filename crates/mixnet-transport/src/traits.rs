// ============================================
// File: crates/mixnet-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines abstract interfaces for the two kinds of I/O a mix node does:
//! datagrams on the relay socket, and the per-channel link an exit hop
//! keeps open to the real destination.
//!
//! ## Main Functionality
//! - `Transport`: UDP-like datagram transport interface
//! - `PacketSource`: Metadata about received packets
//! - `DestinationConnector`: opens a `DestinationLink` for a channel
//! - `DestinationLink`: message-oriented send/recv to one destination
//!
//! ## ⚠️ Important Note for Next Developer
//! - All I/O trait methods are async for consistency
//! - Implementations must be Send + Sync for use in async contexts
//! - `DestinationLink::recv` must be cancel-safe enough to sit in a
//!   dedicated reader task; the exit driver never races it in `select!`
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use mixnet_common::{ChannelId, Destination};

use crate::error::Result;

// ============================================
// PacketSource
// ============================================

/// Metadata about the source of a received packet.
///
/// # Purpose
/// Nodes demultiplex relay traffic by source: a datagram from the next hop
/// is a response, anything else is a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketSource {
    /// Source address (IP and port).
    pub addr: SocketAddr,
    /// When the packet was received.
    pub timestamp: Instant,
}

impl PacketSource {
    /// Creates a new `PacketSource`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timestamp: Instant::now(),
        }
    }

    /// Creates a `PacketSource` with a specific timestamp.
    #[must_use]
    pub const fn with_timestamp(addr: SocketAddr, timestamp: Instant) -> Self {
        Self { addr, timestamp }
    }

    /// Returns the age of this packet (time since received).
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }
}

// ============================================
// Transport Trait
// ============================================

/// Abstract interface for datagram-based transport.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to allow sharing across
/// async tasks.
///
/// # Example
/// ```ignore
/// async fn relay<T: Transport>(transport: &T, next_hop: SocketAddr) -> Result<()> {
///     let mut buf = [0u8; 1500];
///     loop {
///         let (len, _source) = transport.recv(&mut buf).await?;
///         transport.send(&buf[..len], &next_hop).await?;
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receives a packet from the transport.
    ///
    /// # Returns
    /// Tuple of (bytes received, packet source)
    ///
    /// # Errors
    /// Returns error if receive fails
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)>;

    /// Sends a packet via the transport.
    ///
    /// # Returns
    /// Number of bytes sent
    ///
    /// # Errors
    /// Returns error if send fails
    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize>;

    /// Returns the local address this transport is bound to.
    ///
    /// # Errors
    /// Returns error if address cannot be determined
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Gracefully shuts down the transport.
    ///
    /// After shutdown, all operations will return errors.
    ///
    /// # Errors
    /// Returns error if shutdown fails
    async fn shutdown(&self) -> Result<()>;

    /// Returns `true` if the transport is still active.
    fn is_active(&self) -> bool;
}

// ============================================
// Destination Traits
// ============================================

/// A per-channel, message-oriented connection to a channel's destination.
///
/// One call to `send` delivers one reassembled request. One call to `recv`
/// yields one response message, which the exit then fragments.
#[async_trait]
pub trait DestinationLink: Send + Sync {
    /// Sends one complete message to the destination.
    ///
    /// # Errors
    /// Returns error if the message cannot be delivered
    async fn send(&self, message: &[u8]) -> Result<usize>;

    /// Waits for the next message from the destination.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the link is gone
    async fn recv(&self) -> Result<Vec<u8>>;

    /// Returns the local address of the underlying socket.
    ///
    /// # Errors
    /// Returns error if address cannot be determined
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Closes the link. Pending `recv` calls fail with `Closed`.
    async fn close(&self);
}

/// Opens destination links on behalf of exit channels.
///
/// # Example
/// ```ignore
/// let link = connector.connect(channel_id, destination).await?;
/// link.send(&request).await?;
/// ```
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    /// Opens a link to `destination` for the channel `channel_id`.
    ///
    /// # Errors
    /// Returns a channel-fatal error if the destination cannot be reached
    async fn connect(
        &self,
        channel_id: ChannelId,
        destination: Destination,
    ) -> Result<Arc<dyn DestinationLink>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_source() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let source = PacketSource::new(addr);

        assert_eq!(source.addr, addr);
        assert!(source.age() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_packet_source_with_timestamp() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let ts = Instant::now();
        let source = PacketSource::with_timestamp(addr, ts);
        assert_eq!(source.timestamp, ts);
    }
}
