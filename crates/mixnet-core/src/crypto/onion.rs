// ============================================
// File: crates/mixnet-core/src/crypto/onion.rs
// ============================================
//! # Onion Init Message
//!
//! ## Creation Reason
//! Delivers one symmetric channel key to every hop of a path, plus the
//! destination and first fragment to the last hop, in a single fixed-size
//! message in which each hop sees an unlinkable group element.
//!
//! ## Main Functionality
//! - `OnionMessage::build`: sender side, N hops at once
//! - `OnionMessage::process`: one hop peels one layer
//!
//! ## Main Logical Flow
//! ```text
//! sender:  x_1 random, α_1 = x_1·G
//!          s_i = x_i·Y_i ─► HKDF ─► (key onion key_i, payload key_i, b_i)
//!          x_{i+1} = x_i·b_i
//!          for i = N..1:
//!              key_onion     = E_i(k_i ‖ key_onion[..len-32])
//!              payload_onion = E_i(payload_onion)
//!
//! hop i:   s = y_i·α_i ─► same HKDF
//!          k_i ‖ rest = D_i(key_onion); key_onion' = rest ‖ random(32)
//!          payload_onion' = D_i(payload_onion)
//!          α_{i+1} = b_i·α_i
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Layer keys are single-use (fresh ephemeral per message), so a zero
//!   nonce is safe here and ONLY here
//! - Key onion length is `MAX_HOPS * 32` whatever the path length
//!
//! ## Last Modified
//! v0.1.0 - Initial onion implementation

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::trace;
use zeroize::Zeroize;

use super::kdf::derive_hop_secrets;
use super::keys::{OnionKeyPair, OnionPublicKey, SymmetricKey};
use super::{CHACHA20_NONCE_SIZE, GROUP_ELEMENT_LEN, SYM_KEY_LEN};
use crate::error::{CoreError, Result};
use crate::protocol::{KEY_ONION_LEN, MAX_HOPS};

fn apply_layer(key: &SymmetricKey, data: &mut [u8]) {
    let nonce = [0u8; CHACHA20_NONCE_SIZE];
    let mut cipher = ChaCha20::new(key.as_bytes().into(), &nonce.into());
    cipher.apply_keystream(data);
}

fn shared_secret_bytes(point: &MontgomeryPoint) -> Result<[u8; 32]> {
    let bytes = point.to_bytes();
    if bytes == [0u8; 32] {
        return Err(CoreError::malformed_onion("degenerate shared secret"));
    }
    Ok(bytes)
}

// ============================================
// OnionMessage
// ============================================

/// Channel init onion as it travels between two hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionMessage {
    group_element: [u8; GROUP_ELEMENT_LEN],
    key_onion: Vec<u8>,
    payload_onion: Vec<u8>,
}

/// Result of peeling one layer.
#[derive(Debug)]
pub struct ProcessedOnion {
    /// This hop's channel key.
    pub channel_key: SymmetricKey,
    /// Payload onion after removing this hop's layer. At the last hop this
    /// is the plaintext `destination ‖ fragment`.
    pub payload: Vec<u8>,
    /// Onion to forward to the next hop.
    pub forwarded: OnionMessage,
}

impl OnionMessage {
    /// Builds an onion for `hop_keys` delivering `channel_keys` pairwise.
    ///
    /// # Errors
    /// - `InvalidKey` if the key lists are empty, differ in length or exceed
    ///   `MAX_HOPS`
    /// - `MalformedOnionMessage` if a hop public key yields a degenerate
    ///   shared secret
    pub fn build(
        hop_keys: &[OnionPublicKey],
        channel_keys: &[SymmetricKey],
        payload: &[u8],
    ) -> Result<Self> {
        if hop_keys.is_empty() || hop_keys.len() != channel_keys.len() || hop_keys.len() > MAX_HOPS
        {
            return Err(CoreError::invalid_key(format!(
                "need 1..={MAX_HOPS} hop keys matching channel keys, got {} and {}",
                hop_keys.len(),
                channel_keys.len()
            )));
        }

        let mut wide = [0u8; 64];
        OsRng.fill_bytes(&mut wide);
        let mut exponent = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();

        let group_element = (X25519_BASEPOINT * exponent).to_bytes();

        let mut layers = Vec::with_capacity(hop_keys.len());
        for hop in hop_keys {
            let shared = shared_secret_bytes(&(hop.point() * exponent))?;
            let secrets = derive_hop_secrets(&shared)?;
            exponent *= secrets.blind;
            layers.push(secrets);
        }
        exponent.zeroize();

        let mut key_onion = vec![0u8; KEY_ONION_LEN];
        OsRng.fill_bytes(&mut key_onion);
        let mut payload_onion = payload.to_vec();

        for (secrets, channel_key) in layers.iter().zip(channel_keys).rev() {
            let mut next = Vec::with_capacity(KEY_ONION_LEN);
            next.extend_from_slice(channel_key.as_bytes());
            next.extend_from_slice(&key_onion[..KEY_ONION_LEN - SYM_KEY_LEN]);
            apply_layer(&secrets.key_onion_key, &mut next);
            key_onion.zeroize();
            key_onion = next;

            apply_layer(&secrets.payload_key, &mut payload_onion);
        }

        trace!(
            hops = hop_keys.len(),
            payload_len = payload_onion.len(),
            "Onion built"
        );

        Ok(Self {
            group_element,
            key_onion,
            payload_onion,
        })
    }

    /// Peels this hop's layer.
    ///
    /// # Errors
    /// `MalformedOnionMessage` if the group element yields a degenerate
    /// shared secret.
    pub fn process(&self, key: &OnionKeyPair) -> Result<ProcessedOnion> {
        let alpha = MontgomeryPoint(self.group_element);
        let shared = shared_secret_bytes(&key.exponentiate(&alpha))?;
        let secrets = derive_hop_secrets(&shared)?;

        let mut key_onion = self.key_onion.clone();
        apply_layer(&secrets.key_onion_key, &mut key_onion);
        let channel_key = SymmetricKey::from_slice(&key_onion[..SYM_KEY_LEN])?;

        let mut forwarded_keys = Vec::with_capacity(KEY_ONION_LEN);
        forwarded_keys.extend_from_slice(&key_onion[SYM_KEY_LEN..]);
        let mut filler = [0u8; SYM_KEY_LEN];
        OsRng.fill_bytes(&mut filler);
        forwarded_keys.extend_from_slice(&filler);
        key_onion.zeroize();

        let mut payload = self.payload_onion.clone();
        apply_layer(&secrets.payload_key, &mut payload);

        let next_alpha = (alpha * secrets.blind).to_bytes();
        trace!(payload_len = payload.len(), "Onion layer peeled");

        Ok(ProcessedOnion {
            channel_key,
            payload: payload.clone(),
            forwarded: Self {
                group_element: next_alpha,
                key_onion: forwarded_keys,
                payload_onion: payload,
            },
        })
    }

    /// Encodes as `α ‖ key onion ‖ payload onion`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.group_element);
        out.extend_from_slice(&self.key_onion);
        out.extend_from_slice(&self.payload_onion);
        out
    }

    /// Parses `α ‖ key onion ‖ payload onion`; the payload onion is
    /// everything after the fixed-size key onion.
    ///
    /// # Errors
    /// `MalformedOnionMessage` if the input is shorter than the group
    /// element plus key onion.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let fixed = GROUP_ELEMENT_LEN + KEY_ONION_LEN;
        if bytes.len() < fixed {
            return Err(CoreError::malformed_onion(format!(
                "truncated: {} bytes, need at least {fixed}",
                bytes.len()
            )));
        }
        let mut group_element = [0u8; GROUP_ELEMENT_LEN];
        group_element.copy_from_slice(&bytes[..GROUP_ELEMENT_LEN]);
        Ok(Self {
            group_element,
            key_onion: bytes[GROUP_ELEMENT_LEN..fixed].to_vec(),
            payload_onion: bytes[fixed..].to_vec(),
        })
    }

    /// Length of the encoding.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        GROUP_ELEMENT_LEN + self.key_onion.len() + self.payload_onion.len()
    }

    /// Length of the channel-key onion.
    #[must_use]
    pub fn key_onion_len(&self) -> usize {
        self.key_onion.len()
    }

    /// Group element seen by the next hop.
    #[must_use]
    pub const fn group_element(&self) -> &[u8; GROUP_ELEMENT_LEN] {
        &self.group_element
    }
}

// ============================================
// Tests
// ============================================
