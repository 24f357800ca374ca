// ============================================
// File: crates/mixnet-node/src/services/link.rs
// ============================================
//! # Neighbour Links
//!
//! ## Creation Reason
//! Wraps the link-layer cipher state for one neighbour. A node seals what
//! it sends to a neighbour and opens what it receives from it, each with
//! the directional key for that way of travel.
//!
//! ## Main Functionality
//! - `NeighbourLink::towards_next`: seals downstream, opens upstream
//! - `NeighbourLink::towards_previous`: seals upstream, opens downstream
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both ends derive the same `LinkKeys` from the shared link secret; the
//!   previous hop seals with `downstream`, so we open with it
//! - Link counters start over on every process start; restarting one side
//!   of a link without the other makes the restarted side's packets look
//!   stale until its counter passes the peer's window
//!
//! ## Last Modified
//! v0.1.0 - Initial neighbour links

use mixnet_core::crypto::{LinkDecryptor, LinkEncryptor, LinkKeys, SymmetricKey};
use mixnet_core::protocol::ChannelPacket;

use crate::error::Result;

/// Sealing and opening state shared with one neighbour.
pub struct NeighbourLink {
    sealer: LinkEncryptor,
    opener: LinkDecryptor,
}

impl NeighbourLink {
    /// Link to the next hop: requests go out, responses come in.
    ///
    /// # Errors
    /// `Core(KeyDerivation)` if the directional keys cannot be derived.
    pub fn towards_next(secret: &SymmetricKey) -> Result<Self> {
        let keys = LinkKeys::from_secret(secret)?;
        Ok(Self {
            sealer: LinkEncryptor::new(&keys.downstream),
            opener: LinkDecryptor::new(&keys.upstream),
        })
    }

    /// Link to the previous hop: requests come in, responses go out.
    ///
    /// # Errors
    /// `Core(KeyDerivation)` if the directional keys cannot be derived.
    pub fn towards_previous(secret: &SymmetricKey) -> Result<Self> {
        let keys = LinkKeys::from_secret(secret)?;
        Ok(Self {
            sealer: LinkEncryptor::new(&keys.upstream),
            opener: LinkDecryptor::new(&keys.downstream),
        })
    }

    /// Seals a channel packet for this neighbour.
    ///
    /// # Errors
    /// `Core(LinkEncryption)` if the AEAD refuses the input.
    pub fn seal(&mut self, packet: &ChannelPacket) -> Result<Vec<u8>> {
        Ok(self.sealer.encrypt(packet)?)
    }

    /// Opens a wire packet from this neighbour.
    ///
    /// # Errors
    /// `Core(LinkAuthenticationFailed | ReplayDetected | MessageTooShort)`.
    pub fn open(&mut self, wire: &[u8]) -> Result<ChannelPacket> {
        Ok(self.opener.decrypt(wire)?)
    }
}

impl std::fmt::Debug for NeighbourLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighbourLink")
            .field("sent", &self.sealer.counter())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mixnet_common::ChannelId;
    use mixnet_core::protocol::{MessageType, PACKET_SIZE};

    fn packet(counter: u64) -> ChannelPacket {
        ChannelPacket::new(
            ChannelId::new(9).unwrap(),
            MessageType::Data,
            counter,
            vec![0x42; PACKET_SIZE],
        )
    }

    #[test]
    fn test_both_directions() {
        let secret = SymmetricKey::generate();
        let mut upper = NeighbourLink::towards_next(&secret).unwrap();
        let mut lower = NeighbourLink::towards_previous(&secret).unwrap();

        let wire = upper.seal(&packet(1)).unwrap();
        assert_eq!(lower.open(&wire).unwrap(), packet(1));

        let wire = lower.seal(&packet(2)).unwrap();
        assert_eq!(upper.open(&wire).unwrap(), packet(2));
    }

    #[test]
    fn test_reflected_packet_rejected() {
        let secret = SymmetricKey::generate();
        let mut upper = NeighbourLink::towards_next(&secret).unwrap();
        let wire = upper.seal(&packet(1)).unwrap();

        // A packet bounced straight back is sealed under the wrong key.
        let err = upper.open(&wire).unwrap_err();
        assert!(err.is_suspicious());
    }

    #[test]
    fn test_replayed_wire_packet_rejected() {
        let secret = SymmetricKey::generate();
        let mut upper = NeighbourLink::towards_next(&secret).unwrap();
        let mut lower = NeighbourLink::towards_previous(&secret).unwrap();

        let wire = upper.seal(&packet(1)).unwrap();
        lower.open(&wire).unwrap();
        assert!(lower.open(&wire).unwrap_err().is_suspicious());
    }
}
