// ============================================
// File: crates/mixnet-core/src/lib.rs
// ============================================
//! # Mixnet Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Provides the wire formats and cryptographic layering that every hop of
//! the mix network must agree on byte-for-byte. Does no I/O.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Channel packet codec and message types
//! - Replay window
//! - Fixed-size fragmentation and reassembly
//!
//! ### Crypto Module ([`crypto`])
//! - Key types (`SymmetricKey`, `OnionKeyPair`, `LinkKeyPair`)
//! - Onion init message with per-hop blinding
//! - Channel cipher (ChaCha20 counter mode)
//! - Link encryption (ChaCha20-Poly1305 over the header)
//! - Key derivation (HKDF-SHA256)
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               mixnet-node                           │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   mixnet-core  ◄──     mixnet-transport            │
//! │   You are here                │                    │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             mixnet-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto / dalek implementations
//! - ALL secret keys implement Zeroize
//! - Size constants in [`protocol`] are shared by every role; never change
//!   one without the others
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use crypto::{
    AeadChannelCipher, CtrChannelCipher, Direction, LinkDecryptor, LinkEncryptor, LinkKeys, OnionKeyPair,
    OnionMessage, OnionPublicKey, SymmetricChannelCipher, SymmetricKey,
};
pub use error::{CoreError, Result};
pub use protocol::{
    ChannelPacket, FragmentGenerator, MessageIdAllocator, MessageType, MixMessageStore,
    ReplayWindow,
};
