// ============================================
// File: crates/mixnet-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Creation Reason
//! Every derived key in the mixnet comes from HKDF-SHA256 with its own
//! salt and info string, so keys for different purposes never coincide.
//!
//! ## Main Functionality
//! - `hkdf_expand`: generic HKDF-SHA256 expansion
//! - `derive_link_secret`: link secret from a static X25519 exchange
//! - `derive_link_keys`: directional link keys from a link secret
//! - `derive_hop_secrets`: per-hop onion layer keys and blinding scalar
//!
//! ## ⚠️ Important Note for Next Developer
//! - Info strings are part of the wire protocol: both ends must agree
//! - Never log inputs or outputs of these functions
//!
//! ## Last Modified
//! v0.1.0 - Initial key derivation

use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::keys::{LinkPublicKey, SymmetricKey};
use super::{LINK_HKDF_SALT, ONION_HKDF_SALT, SYM_KEY_LEN};
use crate::error::{CoreError, Result};

const LINK_SECRET_INFO: &[u8] = b"link-secret";
const LINK_DOWNSTREAM_INFO: &[u8] = b"link-downstream";
const LINK_UPSTREAM_INFO: &[u8] = b"link-upstream";
const HOP_SECRETS_INFO: &[u8] = b"hop-secrets";

/// Length of the HKDF output split into hop secrets.
const HOP_SECRETS_LEN: usize = SYM_KEY_LEN * 2 + 64;

// ============================================
// Generic Expansion
// ============================================

/// Expands input keying material into `output_len` bytes.
///
/// # Errors
/// `KeyDerivation` if `output_len` exceeds the HKDF-SHA256 maximum
/// (255 * 32 bytes).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut output = vec![0u8; output_len];
    hk.expand(info, &mut output)
        .map_err(|_| CoreError::KeyDerivation {
            reason: format!("HKDF expansion failed for {output_len} bytes"),
        })?;

    Ok(output)
}

fn expand_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<SymmetricKey> {
    let mut bytes = hkdf_expand(ikm, salt, info, SYM_KEY_LEN)?;
    let key = SymmetricKey::from_slice(&bytes);
    bytes.zeroize();
    key
}

// ============================================
// Link Keys
// ============================================

/// Derives the shared link secret of two neighbours from their static
/// X25519 exchange.
///
/// Both public keys are bound into the info string in sorted order, so
/// either side computes the same secret.
///
/// # Errors
/// `KeyDerivation` if expansion fails.
pub fn derive_link_secret(
    shared_secret: &[u8; 32],
    a: &LinkPublicKey,
    b: &LinkPublicKey,
) -> Result<SymmetricKey> {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };

    let mut info = Vec::with_capacity(LINK_SECRET_INFO.len() + 64);
    info.extend_from_slice(LINK_SECRET_INFO);
    info.extend_from_slice(low.as_bytes());
    info.extend_from_slice(high.as_bytes());

    expand_key(shared_secret, LINK_HKDF_SALT, &info)
}

/// Derives `(downstream, upstream)` keys from a link secret.
///
/// Downstream is the entry-to-exit direction.
///
/// # Errors
/// `KeyDerivation` if expansion fails.
pub fn derive_link_keys(secret: &SymmetricKey) -> Result<(SymmetricKey, SymmetricKey)> {
    let downstream = expand_key(secret.as_bytes(), LINK_HKDF_SALT, LINK_DOWNSTREAM_INFO)?;
    let upstream = expand_key(secret.as_bytes(), LINK_HKDF_SALT, LINK_UPSTREAM_INFO)?;
    Ok((downstream, upstream))
}

// ============================================
// Onion Hop Secrets
// ============================================

/// Material derived from one hop's onion shared secret.
pub struct HopSecrets {
    /// Stream key for this hop's layer of the channel-key onion.
    pub key_onion_key: SymmetricKey,
    /// Stream key for this hop's layer of the payload onion.
    pub payload_key: SymmetricKey,
    /// Scalar that advances the group element for the next hop.
    pub blind: Scalar,
}

impl Drop for HopSecrets {
    fn drop(&mut self) {
        self.blind.zeroize();
    }
}

/// Derives the layer keys and blinding scalar from a shared secret.
///
/// # Errors
/// `KeyDerivation` if expansion fails.
pub fn derive_hop_secrets(shared_secret: &[u8; 32]) -> Result<HopSecrets> {
    let mut okm = hkdf_expand(shared_secret, ONION_HKDF_SALT, HOP_SECRETS_INFO, HOP_SECRETS_LEN)?;

    let key_onion_key = SymmetricKey::from_slice(&okm[..SYM_KEY_LEN])?;
    let payload_key = SymmetricKey::from_slice(&okm[SYM_KEY_LEN..SYM_KEY_LEN * 2])?;

    let mut wide = [0u8; 64];
    wide.copy_from_slice(&okm[SYM_KEY_LEN * 2..]);
    let blind = Scalar::from_bytes_mod_order_wide(&wide);

    wide.zeroize();
    okm.zeroize();

    Ok(HopSecrets {
        key_onion_key,
        payload_key,
        blind,
    })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::LinkKeyPair;

    #[test]
    fn test_hkdf_expand_lengths() {
        assert_eq!(hkdf_expand(b"ikm", b"salt", b"info", 16).unwrap().len(), 16);
        assert_eq!(hkdf_expand(b"ikm", b"salt", b"info", 128).unwrap().len(), 128);
        assert!(hkdf_expand(b"ikm", b"salt", b"info", 255 * 32 + 1).is_err());
    }

    #[test]
    fn test_link_secret_symmetric() {
        let alice = LinkKeyPair::generate();
        let bob = LinkKeyPair::generate();

        let from_alice = derive_link_secret(
            &alice.diffie_hellman(bob.public_key()),
            alice.public_key(),
            bob.public_key(),
        )
        .unwrap();
        let from_bob = derive_link_secret(
            &bob.diffie_hellman(alice.public_key()),
            bob.public_key(),
            alice.public_key(),
        )
        .unwrap();

        assert_eq!(from_alice, from_bob);
    }

    #[test]
    fn test_link_keys_differ_per_direction() {
        let secret = SymmetricKey::from_bytes([9; 32]);
        let (down, up) = derive_link_keys(&secret).unwrap();
        assert_ne!(down, up);
    }

    #[test]
    fn test_hop_secrets_deterministic() {
        let a = derive_hop_secrets(&[1; 32]).unwrap();
        let b = derive_hop_secrets(&[1; 32]).unwrap();
        let c = derive_hop_secrets(&[2; 32]).unwrap();

        assert_eq!(a.key_onion_key, b.key_onion_key);
        assert_eq!(a.blind, b.blind);
        assert_ne!(a.key_onion_key, a.payload_key);
        assert_ne!(a.blind, c.blind);
    }
}
