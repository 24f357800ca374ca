// ============================================
// File: crates/mixnet-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines key types used throughout the mixnet protocol with proper
//! security properties (Zeroize on drop, redacted Debug output).
//!
//! ## Main Functionality
//! - `SymmetricKey`: 32-byte channel, link and onion layer keys
//! - `OnionKeyPair` / `OnionPublicKey`: long-term mix keys for the init onion
//! - `LinkKeyPair` / `LinkPublicKey`: static X25519 keys between neighbours
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  OnionKeyPair (Long-term, per mix)                         │
//! │  ├─ Generated once by `keygen`, stored in the key file     │
//! │  └─ Public half is configured at every entry               │
//! │                                                            │
//! │  LinkKeyPair (Long-term, per node)                         │
//! │  └─ Static DH with each neighbour yields the link secret   │
//! │                                                            │
//! │  SymmetricKey (Per channel per hop)                        │
//! │  ├─ Chosen by the entry, delivered inside the init onion   │
//! │  └─ Discarded when the channel is evicted                  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL secret key types MUST zeroize on drop
//! - Private keys should NEVER be logged
//! - Onion public keys are Montgomery u-coordinates, NOT clamped X25519
//!   keys: the onion does scalar arithmetic mod the group order
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{GROUP_ELEMENT_LEN, SYM_KEY_LEN};
use crate::error::{CoreError, Result};

// ============================================
// SymmetricKey
// ============================================

/// 32-byte symmetric key.
///
/// # Security
/// - Zeroed on drop
/// - Never logged or serialized
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYM_KEY_LEN]);

impl SymmetricKey {
    /// Generates a fresh random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYM_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SYM_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a slice.
    ///
    /// # Errors
    /// `InvalidKey` if the slice is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SYM_KEY_LEN] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "symmetric key must be {SYM_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Creates a key from a base64 string.
    ///
    /// # Errors
    /// `InvalidKey` if decoding fails or the length is wrong.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CoreError::invalid_key(format!("base64: {e}")))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or store the key material in unprotected storage.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SYM_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        // No early exit on the first differing byte
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for SymmetricKey {}

// ============================================
// OnionKeyPair
// ============================================

/// Long-term key pair of a mix, used to peel init onions.
///
/// The secret is a scalar reduced from 64 random bytes and the public key is
/// `secret·G` as a Montgomery u-coordinate.
///
/// # Example
/// ```
/// use mixnet_core::crypto::OnionKeyPair;
///
/// let mix = OnionKeyPair::generate();
/// let restored = OnionKeyPair::from_bytes(&mix.to_bytes()).unwrap();
/// assert_eq!(mix.public_key(), restored.public_key());
/// ```
pub struct OnionKeyPair {
    secret: Scalar,
    public: OnionPublicKey,
}

impl OnionKeyPair {
    /// Generates a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let mut wide = [0u8; 64];
        OsRng.fill_bytes(&mut wide);
        let secret = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        Self::from_scalar(secret)
    }

    fn from_scalar(secret: Scalar) -> Self {
        let public = OnionPublicKey(X25519_BASEPOINT * secret);
        Self { secret, public }
    }

    /// Restores a key pair from its canonical 32-byte scalar encoding.
    ///
    /// # Errors
    /// `InvalidKey` for a wrong length or a non-canonical scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_key("onion secret must be 32 bytes"))?;
        let secret: Option<Scalar> = Scalar::from_canonical_bytes(arr).into();
        arr.zeroize();
        let secret = secret.ok_or_else(|| CoreError::invalid_key("onion secret not canonical"))?;
        Ok(Self::from_scalar(secret))
    }

    /// Returns the canonical scalar encoding of the secret.
    ///
    /// # Security Warning
    /// Only for writing key files.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Returns the public key.
    #[must_use]
    pub const fn public_key(&self) -> &OnionPublicKey {
        &self.public
    }

    /// Multiplies a received group element by the secret scalar.
    #[must_use]
    pub(crate) fn exponentiate(&self, element: &MontgomeryPoint) -> MontgomeryPoint {
        element * self.secret
    }
}

impl Drop for OnionKeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl fmt::Debug for OnionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnionKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

// ============================================
// OnionPublicKey
// ============================================

/// Public onion key of a mix.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OnionPublicKey(MontgomeryPoint);

impl OnionPublicKey {
    /// Creates a public key from its 32-byte encoding.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; GROUP_ELEMENT_LEN]) -> Self {
        Self(MontgomeryPoint(bytes))
    }

    /// Parses a base64 encoded public key.
    ///
    /// # Errors
    /// `InvalidKey` if decoding fails or the length is wrong.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CoreError::invalid_key(format!("base64: {e}")))?;
        let arr: [u8; GROUP_ELEMENT_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::invalid_key("onion public key must be 32 bytes"))?;
        Ok(Self::from_bytes(arr))
    }

    /// Returns the raw encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; GROUP_ELEMENT_LEN] {
        self.0.as_bytes()
    }

    pub(crate) const fn point(&self) -> &MontgomeryPoint {
        &self.0
    }
}

impl fmt::Debug for OnionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        write!(
            f,
            "OnionPublicKey({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

impl fmt::Display for OnionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0.as_bytes()))
    }
}

impl Serialize for OnionPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(self.0.as_bytes()))
    }
}

impl<'de> Deserialize<'de> for OnionPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================
// LinkKeyPair (X25519)
// ============================================

/// Static X25519 key pair used to agree a link secret with a neighbour.
pub struct LinkKeyPair {
    secret: StaticSecret,
    public: LinkPublicKey,
}

impl LinkKeyPair {
    /// Generates a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = LinkPublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Restores a key pair from raw secret bytes.
    ///
    /// # Errors
    /// `InvalidKey` if the slice is not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_key("link secret must be 32 bytes"))?;
        let secret = StaticSecret::from(arr);
        arr.zeroize();
        Ok(Self::from_secret(secret))
    }

    /// Returns the raw secret bytes.
    ///
    /// # Security Warning
    /// Only for writing key files.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Returns the public key.
    #[must_use]
    pub const fn public_key(&self) -> &LinkPublicKey {
        &self.public
    }

    /// Computes the raw X25519 shared secret with a neighbour.
    #[must_use]
    pub fn diffie_hellman(&self, peer: &LinkPublicKey) -> [u8; 32] {
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(peer.0));
        *shared.as_bytes()
    }
}

impl fmt::Debug for LinkKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Public link key of a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkPublicKey([u8; 32]);

impl LinkPublicKey {
    /// Creates a public key from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a base64 encoded public key.
    ///
    /// # Errors
    /// `InvalidKey` if decoding fails or the length is wrong.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CoreError::invalid_key(format!("base64: {e}")))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::invalid_key("link public key must be 32 bytes"))?;
        Ok(Self(arr))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for LinkPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LinkPublicKey({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for LinkPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl Serialize for LinkPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for LinkPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_key_debug_redacted() {
        let key = SymmetricKey::from_bytes([0x42; 32]);
        assert_eq!(format!("{key:?}"), "SymmetricKey([REDACTED])");
    }

    #[test]
    fn test_symmetric_key_from_base64() {
        let encoded = BASE64.encode([7u8; 32]);
        let key = SymmetricKey::from_base64(&encoded).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
        assert!(SymmetricKey::from_base64(&BASE64.encode([7u8; 16])).is_err());
        assert!(SymmetricKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_onion_keypair_roundtrip() {
        let kp = OnionKeyPair::generate();
        let restored = OnionKeyPair::from_bytes(&kp.to_bytes()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn test_onion_exponentiation_commutes() {
        let a = OnionKeyPair::generate();
        let b = OnionKeyPair::generate();
        let ab = a.exponentiate(b.public_key().point());
        let ba = b.exponentiate(a.public_key().point());
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_link_key_exchange() {
        let alice = LinkKeyPair::generate();
        let bob = LinkKeyPair::generate();
        assert_eq!(
            alice.diffie_hellman(bob.public_key()),
            bob.diffie_hellman(alice.public_key())
        );
    }

    #[test]
    fn test_public_key_serialization() {
        let onion = *OnionKeyPair::generate().public_key();
        let json = serde_json::to_string(&onion).unwrap();
        let restored: OnionPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(onion, restored);

        let link = *LinkKeyPair::generate().public_key();
        let json = serde_json::to_string(&link).unwrap();
        let restored: LinkPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(link, restored);
    }
}
