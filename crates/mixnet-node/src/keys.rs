// ============================================
// File: crates/mixnet-node/src/keys.rs
// ============================================
//! # Node Key Material
//!
//! ## Creation Reason
//! Turns the `[keys]` configuration section and the optional JSON key file
//! into the decoded keys a driver needs.
//!
//! ## Main Functionality
//! - `KeyFile`: JSON key file written by `mixnet-node keygen`
//! - `NodeKeys`: decoded onion key, hop keys and per-neighbour link secrets
//!
//! ## Key File Format
//! ```json
//! {
//!   "version": "1.0",
//!   "onion_secret": "<base64>",
//!   "onion_public": "<base64>",
//!   "link_secret": "<base64>",
//!   "link_public": "<base64>",
//!   "created_at": "1760000000Z"
//! }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Inline secrets in the config override the key file
//! - A pre-shared link secret overrides the X25519 agreement for that
//!   neighbour
//! - Key files are written with 0600 permissions on Unix
//!
//! ## Last Modified
//! v0.1.0 - Initial key loading

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mixnet_core::crypto::kdf::derive_link_secret;
use mixnet_core::crypto::{LinkKeyPair, LinkPublicKey, OnionKeyPair, OnionPublicKey, SymmetricKey};

use crate::config::KeysConfig;
use crate::error::{NodeError, Result};

// ============================================
// KeyFile
// ============================================

/// On-disk key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    /// Format version.
    pub version: String,
    /// Onion secret scalar.
    pub onion_secret: String,
    /// Onion public key, for neighbouring operators.
    pub onion_public: String,
    /// Link secret key.
    pub link_secret: String,
    /// Link public key, for neighbouring operators.
    pub link_public: String,
    /// Creation time, seconds since the epoch.
    pub created_at: String,
}

impl KeyFile {
    /// Generates fresh onion and link key pairs.
    #[must_use]
    pub fn generate() -> Self {
        let onion = OnionKeyPair::generate();
        let link = LinkKeyPair::generate();
        Self {
            version: "1.0".to_string(),
            onion_secret: BASE64.encode(onion.to_bytes()),
            onion_public: onion.public_key().to_string(),
            link_secret: BASE64.encode(link.to_bytes()),
            link_public: BASE64.encode(link.public_key().as_bytes()),
            created_at: timestamp(),
        }
    }

    /// Reads a key file.
    ///
    /// # Errors
    /// `KeyFile` if the file cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::key_file(&path_str, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| NodeError::key_file(&path_str, e.to_string()))
    }

    /// Writes the key file, creating parent directories.
    ///
    /// # Errors
    /// `Io` if the file cannot be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| NodeError::key_file(path.display().to_string(), e.to_string()))?;
        tokio::fs::write(path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(path, perms).await?;
        }

        Ok(())
    }

    /// Decodes the onion key pair.
    ///
    /// # Errors
    /// `Core` if the secret is malformed.
    pub fn onion_key_pair(&self) -> Result<OnionKeyPair> {
        decode_onion_secret(&self.onion_secret)
    }

    /// Decodes the link key pair.
    ///
    /// # Errors
    /// `Core` if the secret is malformed.
    pub fn link_key_pair(&self) -> Result<LinkKeyPair> {
        decode_link_secret(&self.link_secret)
    }
}

fn timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}Z", duration.as_secs())
}

fn decode_base64(field: &str, encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| NodeError::config_invalid(field, format!("base64: {e}")))
}

fn decode_onion_secret(encoded: &str) -> Result<OnionKeyPair> {
    let bytes = decode_base64("keys.onion_secret", encoded)?;
    Ok(OnionKeyPair::from_bytes(&bytes)?)
}

fn decode_link_secret(encoded: &str) -> Result<LinkKeyPair> {
    let bytes = decode_base64("keys.link_secret", encoded)?;
    Ok(LinkKeyPair::from_bytes(&bytes)?)
}

// ============================================
// NodeKeys
// ============================================

/// Decoded key material of one node.
#[derive(Debug, Default)]
pub struct NodeKeys {
    /// Onion key pair; absent on the entry.
    pub onion: Option<OnionKeyPair>,
    /// Onion public keys of hops 1..N; entry only.
    pub hop_public_keys: Vec<OnionPublicKey>,
    /// Link secret shared with the previous hop.
    pub previous_link: Option<SymmetricKey>,
    /// Link secret shared with the next hop.
    pub next_link: Option<SymmetricKey>,
}

impl NodeKeys {
    /// Decodes the `[keys]` section, reading the key file if one is set.
    ///
    /// # Errors
    /// `KeyFile` for an unreadable key file, `ConfigInvalid` or `Core` for
    /// malformed key strings.
    pub async fn load(config: &KeysConfig) -> Result<Self> {
        let file = match &config.key_file {
            Some(path) => Some(KeyFile::load(path).await?),
            None => None,
        };

        let onion = match (&config.onion_secret, &file) {
            (Some(secret), _) => Some(decode_onion_secret(secret)?),
            (None, Some(file)) => Some(file.onion_key_pair()?),
            (None, None) => None,
        };

        let link = match (&config.link_secret, &file) {
            (Some(secret), _) => Some(decode_link_secret(secret)?),
            (None, Some(file)) => Some(file.link_key_pair()?),
            (None, None) => None,
        };

        let hop_public_keys = config
            .hop_public_keys
            .iter()
            .map(|key| OnionPublicKey::from_base64(key))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let previous_link = resolve_link_secret(
            "previous",
            config.previous_shared_secret.as_deref(),
            link.as_ref(),
            config.previous_link_key.as_deref(),
        )?;
        let next_link = resolve_link_secret(
            "next",
            config.next_shared_secret.as_deref(),
            link.as_ref(),
            config.next_link_key.as_deref(),
        )?;

        if let Some(onion) = &onion {
            info!(onion_public = %onion.public_key(), "Onion key loaded");
        }

        Ok(Self {
            onion,
            hop_public_keys,
            previous_link,
            next_link,
        })
    }
}

/// Picks the link secret for one neighbour.
///
/// A configured shared secret wins. Otherwise the secret is agreed by
/// static X25519 between this node's link key and the neighbour's public
/// link key, then run through HKDF.
///
/// # Errors
/// `Core` or `ConfigInvalid` if a key string does not decode.
pub fn resolve_link_secret(
    neighbour: &str,
    shared_secret: Option<&str>,
    own: Option<&LinkKeyPair>,
    peer_public: Option<&str>,
) -> Result<Option<SymmetricKey>> {
    if let Some(secret) = shared_secret {
        debug!(neighbour, "Using pre-shared link secret");
        return Ok(Some(SymmetricKey::from_base64(secret)?));
    }

    match (own, peer_public) {
        (Some(own), Some(peer)) => {
            let peer = LinkPublicKey::from_base64(peer)?;
            let shared = own.diffie_hellman(&peer);
            debug!(neighbour, peer = %peer, "Agreed link secret");
            Ok(Some(derive_link_secret(&shared, own.public_key(), &peer)?))
        }
        _ => Ok(None),
    }
}

// ============================================
// Tests
// ============================================
