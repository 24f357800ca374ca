// ============================================
// File: crates/mixnet-core/src/crypto/channel_cipher.rs
// ============================================
//! # Channel Cipher
//!
//! ## Creation Reason
//! Each hop removes (requests) or adds (responses) exactly one layer of
//! channel encryption with the key it received in the init onion. The
//! layer must not change the length of the data, otherwise the packet
//! size would reveal the hop position.
//!
//! ## Main Functionality
//! - `Direction`: request or response, folded into the nonce
//! - `SymmetricChannelCipher`: the capability the channel tables hold
//! - `CtrChannelCipher`: ChaCha20 keyed per hop, nonce from the counter
//! - `AeadChannelCipher`: same outer layers, ChaCha20-Poly1305 on the
//!   innermost (entry to exit) layer
//!
//! ## Nonce Construction
//! ```text
//! nonce (12 bytes) = counter (8 bytes BE) || direction (1) || kind (1) || 0x0000
//! kind: 0x00 outer layer, 0x01 sealed innermost layer
//! ```
//!
//! ## Layer Placement
//! ```text
//! entry ── E(k1) ── E(k2) ── seal(k3) ──────► exit      (requests)
//! entry ◄─ D(k1) ── D(k2) ── open(k3) ─────── exit      (responses)
//! ```
//! Mixes only ever `apply` a layer. Only the entry and the exit `seal` and
//! `open`, and they always know where the innermost layer sits.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Outer layers must stay length-preserving. A mix does not know its
//!   position on the path, so it could not locate a per-layer tag inside a
//!   payload that random filler pads back to the fixed size
//! - A sealed innermost layer shrinks DATA fragments by `tag_len()`; use
//!   `data_fragment_len()`, never `DATA_FRAG_SIZE`, to size them
//! - Entry and exit must run the same variant; mixes work with either
//! - Request and response counters are independent; the direction byte
//!   keeps their keystreams apart under one key
//!
//! ## Last Modified
//! v0.1.0 - Initial channel cipher
//! v0.1.1 - Sealed innermost layer variant

use std::fmt;

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;

use super::keys::SymmetricKey;
use super::{CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::DATA_FRAG_SIZE;

/// Direction of a channel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Entry towards exit.
    Request,
    /// Exit towards entry.
    Response,
}

impl Direction {
    const fn nonce_byte(self) -> u8 {
        match self {
            Self::Request => 0x00,
            Self::Response => 0x01,
        }
    }
}

const OUTER_LAYER: u8 = 0x00;
const SEALED_LAYER: u8 = 0x01;

fn make_nonce(counter: u64, direction: Direction, kind: u8) -> [u8; CHACHA20_NONCE_SIZE] {
    let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
    nonce[..8].copy_from_slice(&counter.to_be_bytes());
    nonce[8] = direction.nonce_byte();
    nonce[9] = kind;
    nonce
}

/// Per-hop channel encryption.
///
/// Outer layers are length-preserving. The innermost layer goes through
/// `seal` and `open`, which may add `tag_len()` bytes and authenticate.
pub trait SymmetricChannelCipher: Send + Sync + fmt::Debug {
    /// Encrypts or decrypts an outer layer in place.
    fn apply(&self, key: &SymmetricKey, counter: u64, direction: Direction, data: &mut [u8]);

    /// Short name for logs and configuration.
    fn name(&self) -> &'static str;

    /// Bytes `seal` adds to its input.
    fn tag_len(&self) -> usize {
        0
    }

    /// Fragment size that fits a DATA payload once sealed.
    fn data_fragment_len(&self) -> usize {
        DATA_FRAG_SIZE - self.tag_len()
    }

    /// Encrypts the innermost layer.
    ///
    /// # Errors
    /// `ChannelEncryption` if the cipher refuses the input.
    fn seal(
        &self,
        key: &SymmetricKey,
        counter: u64,
        direction: Direction,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        Ok(self.encrypt(key, counter, direction, plaintext))
    }

    /// Decrypts the innermost layer.
    ///
    /// # Errors
    /// `ChannelAuthenticationFailed` if the layer does not verify.
    fn open(
        &self,
        key: &SymmetricKey,
        counter: u64,
        direction: Direction,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        Ok(self.decrypt(key, counter, direction, ciphertext))
    }

    /// Returns the encryption of `plaintext`.
    fn encrypt(
        &self,
        key: &SymmetricKey,
        counter: u64,
        direction: Direction,
        plaintext: &[u8],
    ) -> Vec<u8> {
        let mut out = plaintext.to_vec();
        self.apply(key, counter, direction, &mut out);
        out
    }

    /// Returns the decryption of `ciphertext`.
    fn decrypt(
        &self,
        key: &SymmetricKey,
        counter: u64,
        direction: Direction,
        ciphertext: &[u8],
    ) -> Vec<u8> {
        self.encrypt(key, counter, direction, ciphertext)
    }
}

/// ChaCha20 counter-mode channel cipher.
#[derive(Debug, Default, Clone, Copy)]
pub struct CtrChannelCipher;

impl CtrChannelCipher {
    /// Creates a new instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SymmetricChannelCipher for CtrChannelCipher {
    fn apply(&self, key: &SymmetricKey, counter: u64, direction: Direction, data: &mut [u8]) {
        let nonce = make_nonce(counter, direction, OUTER_LAYER);
        let mut cipher = ChaCha20::new(key.as_bytes().into(), &nonce.into());
        cipher.apply_keystream(data);
    }

    fn name(&self) -> &'static str {
        "chacha20-ctr"
    }
}

/// ChaCha20 outer layers with a ChaCha20-Poly1305 innermost layer.
///
/// Tampering anywhere on the path is caught by the exit for requests and
/// by the entry for responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct AeadChannelCipher;

impl AeadChannelCipher {
    /// Creates a new instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SymmetricChannelCipher for AeadChannelCipher {
    fn apply(&self, key: &SymmetricKey, counter: u64, direction: Direction, data: &mut [u8]) {
        CtrChannelCipher.apply(key, counter, direction, data);
    }

    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }

    fn tag_len(&self) -> usize {
        POLY1305_TAG_SIZE
    }

    fn seal(
        &self,
        key: &SymmetricKey,
        counter: u64,
        direction: Direction,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let nonce = make_nonce(counter, direction, SEALED_LAYER);
        ChaCha20Poly1305::new(key.as_bytes().into())
            .encrypt(&nonce.into(), plaintext)
            .map_err(|_| CoreError::ChannelEncryption)
    }

    fn open(
        &self,
        key: &SymmetricKey,
        counter: u64,
        direction: Direction,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let nonce = make_nonce(counter, direction, SEALED_LAYER);
        ChaCha20Poly1305::new(key.as_bytes().into())
            .decrypt(&nonce.into(), ciphertext)
            .map_err(|_| CoreError::ChannelAuthenticationFailed)
    }
}

/// Builds the cipher registered under `name`.
///
/// # Errors
/// `UnknownCipher` for an unknown name.
pub fn cipher_by_name(name: &str) -> Result<std::sync::Arc<dyn SymmetricChannelCipher>> {
    match name {
        "chacha20-ctr" => Ok(std::sync::Arc::new(CtrChannelCipher::new())),
        "chacha20-poly1305" => Ok(std::sync::Arc::new(AeadChannelCipher::new())),
        other => Err(CoreError::UnknownCipher(other.to_string())),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctr_roundtrip_preserves_length() {
        let cipher = CtrChannelCipher::new();
        let key = SymmetricKey::generate();
        let plain = vec![0xAB; 496];

        let ct = cipher.encrypt(&key, 5, Direction::Request, &plain);
        assert_eq!(ct.len(), plain.len());
        assert_ne!(ct, plain);
        assert_eq!(cipher.decrypt(&key, 5, Direction::Request, &ct), plain);
    }

    #[test]
    fn test_direction_separates_keystreams() {
        let cipher = CtrChannelCipher::new();
        let key = SymmetricKey::generate();
        let zeros = [0u8; 64];

        let req = cipher.encrypt(&key, 1, Direction::Request, &zeros);
        let resp = cipher.encrypt(&key, 1, Direction::Response, &zeros);
        assert_ne!(req, resp);
    }

    #[test]
    fn test_counter_changes_keystream() {
        let cipher = CtrChannelCipher::new();
        let key = SymmetricKey::generate();
        let zeros = [0u8; 32];
        assert_ne!(
            cipher.encrypt(&key, 1, Direction::Request, &zeros),
            cipher.encrypt(&key, 2, Direction::Request, &zeros)
        );
    }

    #[test]
    fn test_trait_object_dispatch() {
        let cipher: std::sync::Arc<dyn SymmetricChannelCipher> =
            std::sync::Arc::new(CtrChannelCipher::new());
        assert_eq!(cipher.name(), "chacha20-ctr");
        assert_eq!(cipher.tag_len(), 0);
        assert_eq!(cipher.data_fragment_len(), DATA_FRAG_SIZE);
    }

    #[test]
    fn test_aead_seal_fills_data_fragment() {
        let cipher = AeadChannelCipher::new();
        let key = SymmetricKey::generate();
        let fragment = vec![0x42; cipher.data_fragment_len()];

        let sealed = cipher.seal(&key, 3, Direction::Response, &fragment).unwrap();
        assert_eq!(sealed.len(), DATA_FRAG_SIZE);
        assert_eq!(cipher.open(&key, 3, Direction::Response, &sealed).unwrap(), fragment);
    }

    #[test]
    fn test_aead_open_rejects_tampering() {
        let cipher = AeadChannelCipher::new();
        let key = SymmetricKey::generate();
        let mut sealed = cipher.seal(&key, 9, Direction::Request, &[7u8; 64]).unwrap();
        sealed[10] ^= 0x01;
        assert!(matches!(
            cipher.open(&key, 9, Direction::Request, &sealed),
            Err(CoreError::ChannelAuthenticationFailed)
        ));

        let sealed = cipher.seal(&key, 9, Direction::Request, &[7u8; 64]).unwrap();
        assert!(cipher.open(&key, 10, Direction::Request, &sealed).is_err());
        assert!(cipher.open(&key, 9, Direction::Response, &sealed).is_err());
    }

    #[test]
    fn test_aead_outer_layers_match_ctr() {
        let key = SymmetricKey::generate();
        let data = [0x5Cu8; 100];
        assert_eq!(
            AeadChannelCipher::new().encrypt(&key, 4, Direction::Request, &data),
            CtrChannelCipher::new().encrypt(&key, 4, Direction::Request, &data)
        );
    }

    #[test]
    fn test_cipher_by_name() {
        assert_eq!(cipher_by_name("chacha20-ctr").unwrap().name(), "chacha20-ctr");
        assert_eq!(
            cipher_by_name("chacha20-poly1305").unwrap().tag_len(),
            POLY1305_TAG_SIZE
        );
        assert!(matches!(
            cipher_by_name("aes-cbc"),
            Err(CoreError::UnknownCipher(_))
        ));
    }
}
