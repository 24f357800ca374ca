// ============================================
// File: crates/mixnet-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations of the mixnet, using audited
//! RustCrypto and dalek implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Key types (channel keys, onion key pairs, link key pairs)
//! - [`kdf`]: Key derivation functions (HKDF-SHA256)
//! - [`link`]: Hop-to-hop link encryption (ChaCha20-Poly1305 header AEAD)
//! - [`channel_cipher`]: Per-hop channel cipher (ChaCha20 stream, optional sealed innermost layer)
//! - [`onion`]: Channel init onion with X25519 blinding
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Channel Init                             │
//! │  Entry ── onion(α, key onion, payload onion) ──► Mid ──►..  │
//! │           each hop: s = y·α, peel one layer, α' = b·α       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Data Phase                               │
//! │  channel key_i + counter ──► ChaCha20 (one layer per hop)   │
//! │  link key + link counter ──► ChaCha20-Poly1305 (header)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER roll your own crypto primitives
//! - ALL secret keys implement Zeroize
//! - Every (key, nonce) pair must be unique: the channel cipher separates
//!   directions in the nonce, the link layer uses one key per direction
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod channel_cipher;
pub mod kdf;
pub mod keys;
pub mod link;
pub mod onion;

// Re-export primary types at module level
pub use channel_cipher::{
    cipher_by_name, AeadChannelCipher, CtrChannelCipher, Direction, SymmetricChannelCipher,
};
pub use keys::{LinkKeyPair, LinkPublicKey, OnionKeyPair, OnionPublicKey, SymmetricKey};
pub use link::{LinkDecryptor, LinkEncryptor, LinkHeader, LinkKeys};
pub use onion::{OnionMessage, ProcessedOnion};

// ============================================
// Constants
// ============================================

/// Size of every symmetric key (channel keys, link keys, onion layer keys).
pub const SYM_KEY_LEN: usize = 32;

/// Size of an encoded group element (X25519 u-coordinate).
pub const GROUP_ELEMENT_LEN: usize = 32;

/// Size of a ChaCha20 / ChaCha20-Poly1305 nonce.
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag.
pub const POLY1305_TAG_SIZE: usize = 16;

/// HKDF salt for link key derivation.
pub const LINK_HKDF_SALT: &[u8] = b"mixnet-link-v1";

/// HKDF salt for onion hop secrets.
pub const ONION_HKDF_SALT: &[u8] = b"mixnet-onion-v1";
