// ============================================
// File: crates/mixnet-node/src/config.rs
// ============================================
//! # Node Configuration
//!
//! ## Creation Reason
//! Provides configuration management for a mix node of any role,
//! loaded from one TOML file.
//!
//! ## Main Functionality
//! - `NodeConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Per-role configuration validation
//! - Default values for a local three-hop test chain
//!
//! ## Configuration Sections
//! - `node`: role and UDP listen address
//! - `hops`: previous and next hop addresses
//! - `keys`: onion and link key material (base64)
//! - `mixing`: batch thresholds per direction
//! - `limits`: channel timeout, cleanup and tick intervals
//! - `exit`: destination port range, terminal endpoint
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [node]
//! role = "mix"
//! listen_addr = "127.0.0.1:40002"
//!
//! [hops]
//! next = "127.0.0.1:40003"
//!
//! [keys]
//! key_file = "/etc/mixnet/mix.json"
//! next_link_key = "base64 public link key of the next hop"
//! previous_shared_secret = "base64 32-byte secret"
//!
//! [mixing]
//! request_threshold = 4
//! response_threshold = 4
//! channel_cipher = "chacha20-ctr"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require a node restart
//! - `hops.previous` may be left out on mix and exit nodes; the first
//!   datagram not coming from the next hop then fixes it
//! - Key strings are only checked for presence here; they are decoded by
//!   `NodeKeys::load` at startup
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation
//! v0.1.1 - Batch threshold cap, cleanup interval bound

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use mixnet_core::crypto::cipher_by_name;
use mixnet_core::protocol::{MAX_BATCH_THRESHOLD, MAX_HOPS, REPLAY_WINDOW_SIZE};

use crate::error::{NodeError, Result};

// ============================================
// NodeConfig
// ============================================

/// Main node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role and listen address.
    #[serde(default)]
    pub node: NodeSection,

    /// Neighbour addresses.
    #[serde(default)]
    pub hops: HopsConfig,

    /// Key material.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Batching thresholds.
    #[serde(default)]
    pub mixing: MixingConfig,

    /// Timeouts and intervals.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Exit and terminal settings.
    #[serde(default)]
    pub exit: ExitConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!(role = %config.node.role, "Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or validated.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration against the node's role.
    ///
    /// # Errors
    /// Returns the first invalid or missing field.
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.hops.validate(self.node.role)?;
        self.keys.validate(self.node.role)?;
        self.mixing.validate()?;
        self.limits.validate()?;
        self.exit.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Returns the node's role.
    #[must_use]
    pub const fn role(&self) -> NodeRole {
        self.node.role
    }

    /// Returns the UDP listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.node.listen_addr
    }
}

// ============================================
// NodeRole
// ============================================

/// Position of this node in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// First hop; talks to clients.
    #[default]
    Entry,
    /// Intermediate hop.
    Mix,
    /// Last hop; talks to arbitrary UDP destinations.
    Exit,
    /// Last hop; bridges every channel to the local stream endpoint.
    Terminal,
}

impl NodeRole {
    /// `true` for the roles that terminate channels.
    #[must_use]
    pub const fn is_last_hop(self) -> bool {
        matches!(self, Self::Exit | Self::Terminal)
    }

    /// `true` for the roles that peel onions and need an onion key.
    #[must_use]
    pub const fn needs_onion_key(self) -> bool {
        !matches!(self, Self::Entry)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Entry => "entry",
            Self::Mix => "mix",
            Self::Exit => "exit",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

// ============================================
// NodeSection
// ============================================

/// `[node]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Role of this node.
    #[serde(default)]
    pub role: NodeRole,

    /// UDP listen address for relay traffic (and client traffic at the
    /// entry).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 40001))
}

impl NodeSection {
    fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(NodeError::config_invalid(
                "node.listen_addr",
                "port cannot be 0",
            ));
        }
        Ok(())
    }
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: NodeRole::default(),
            listen_addr: default_listen_addr(),
        }
    }
}

// ============================================
// HopsConfig
// ============================================

/// `[hops]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopsConfig {
    /// Previous hop. Learned from traffic when absent.
    #[serde(default)]
    pub previous: Option<SocketAddr>,

    /// Next hop. Required for entry and mix nodes.
    #[serde(default)]
    pub next: Option<SocketAddr>,
}

impl HopsConfig {
    fn validate(&self, role: NodeRole) -> Result<()> {
        match role {
            NodeRole::Entry | NodeRole::Mix if self.next.is_none() => {
                Err(NodeError::config_missing("hops.next"))
            }
            NodeRole::Exit | NodeRole::Terminal if self.next.is_some() => Err(
                NodeError::config_invalid("hops.next", "last hop has no next hop"),
            ),
            _ => Ok(()),
        }
    }
}

// ============================================
// KeysConfig
// ============================================

/// `[keys]` section. All keys are base64 strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// JSON key file produced by `mixnet-node keygen`.
    #[serde(default)]
    pub key_file: Option<String>,

    /// Onion secret scalar. Overrides the key file.
    #[serde(default)]
    pub onion_secret: Option<String>,

    /// Onion public keys of hops 1..N, entry only.
    #[serde(default)]
    pub hop_public_keys: Vec<String>,

    /// Link secret key. Overrides the key file.
    #[serde(default)]
    pub link_secret: Option<String>,

    /// Public link key of the previous hop.
    #[serde(default)]
    pub previous_link_key: Option<String>,

    /// Public link key of the next hop.
    #[serde(default)]
    pub next_link_key: Option<String>,

    /// Pre-shared link secret with the previous hop.
    #[serde(default)]
    pub previous_shared_secret: Option<String>,

    /// Pre-shared link secret with the next hop.
    #[serde(default)]
    pub next_shared_secret: Option<String>,
}

impl KeysConfig {
    fn validate(&self, role: NodeRole) -> Result<()> {
        if role == NodeRole::Entry {
            if self.hop_public_keys.is_empty() {
                return Err(NodeError::config_missing("keys.hop_public_keys"));
            }
            if self.hop_public_keys.len() > MAX_HOPS {
                return Err(NodeError::config_invalid(
                    "keys.hop_public_keys",
                    format!("at most {MAX_HOPS} hops supported"),
                ));
            }
        }

        if role.needs_onion_key() && self.onion_secret.is_none() && self.key_file.is_none() {
            return Err(NodeError::config_missing("keys.onion_secret or keys.key_file"));
        }

        let has_link_key = self.link_secret.is_some() || self.key_file.is_some();

        if !role.is_last_hop()
            && self.next_shared_secret.is_none()
            && !(has_link_key && self.next_link_key.is_some())
        {
            return Err(NodeError::config_missing(
                "keys.next_shared_secret or keys.next_link_key",
            ));
        }

        if role != NodeRole::Entry
            && self.previous_shared_secret.is_none()
            && !(has_link_key && self.previous_link_key.is_some())
        {
            return Err(NodeError::config_missing(
                "keys.previous_shared_secret or keys.previous_link_key",
            ));
        }

        Ok(())
    }
}

// ============================================
// MixingConfig
// ============================================

/// `[mixing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    /// Packets collected before a request batch is released.
    #[serde(default = "default_threshold")]
    pub request_threshold: usize,

    /// Packets collected before a response batch is released.
    #[serde(default = "default_threshold")]
    pub response_threshold: usize,

    /// Channel cipher: `chacha20-ctr` or `chacha20-poly1305`. Entry and
    /// exit of a path must agree.
    #[serde(default = "default_channel_cipher")]
    pub channel_cipher: String,
}

fn default_threshold() -> usize {
    1
}

fn default_channel_cipher() -> String {
    "chacha20-ctr".to_string()
}

impl MixingConfig {
    /// Thresholds above `MAX_BATCH_THRESHOLD` let the shuffles of a full
    /// path reorder one channel's packets past its replay window.
    fn validate(&self) -> Result<()> {
        for (field, threshold) in [
            ("mixing.request_threshold", self.request_threshold),
            ("mixing.response_threshold", self.response_threshold),
        ] {
            if threshold == 0 || threshold > MAX_BATCH_THRESHOLD {
                return Err(NodeError::config_invalid(
                    field,
                    format!(
                        "must be between 1 and {MAX_BATCH_THRESHOLD} \
                         (replay window {REPLAY_WINDOW_SIZE}, {MAX_HOPS} hops)"
                    ),
                ));
            }
        }
        cipher_by_name(&self.channel_cipher)
            .map_err(|e| NodeError::config_invalid("mixing.channel_cipher", e.to_string()))?;
        Ok(())
    }
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            request_threshold: default_threshold(),
            response_threshold: default_threshold(),
            channel_cipher: default_channel_cipher(),
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Idle time after which a channel is evicted.
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_secs: u64,

    /// How often expired channels are swept.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// How often the entry emits one packet per channel.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Maximum concurrent channels per table.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
}

fn default_channel_timeout() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_tick_interval() -> u64 {
    50
}

fn default_max_channels() -> usize {
    1000
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.channel_timeout_secs == 0 {
            return Err(NodeError::config_invalid(
                "limits.channel_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(NodeError::config_invalid(
                "limits.cleanup_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.cleanup_interval_secs > self.channel_timeout_secs {
            return Err(NodeError::config_invalid(
                "limits.cleanup_interval_secs",
                "must not exceed limits.channel_timeout_secs",
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(NodeError::config_invalid(
                "limits.tick_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.max_channels == 0 || self.max_channels > usize::from(u16::MAX) {
            return Err(NodeError::config_invalid(
                "limits.max_channels",
                "must be between 1 and 65535",
            ));
        }
        Ok(())
    }

    /// Channel idle timeout.
    #[must_use]
    pub const fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }

    /// Cleanup sweep interval.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Entry scheduling interval.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            channel_timeout_secs: default_channel_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            tick_interval_ms: default_tick_interval(),
            max_channels: default_max_channels(),
        }
    }
}

// ============================================
// ExitConfig
// ============================================

/// `[exit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Lowest local port for destination sockets.
    #[serde(default = "default_port_low")]
    pub port_range_low: u16,

    /// Highest local port for destination sockets.
    #[serde(default = "default_port_high")]
    pub port_range_high: u16,

    /// Local IP destination sockets bind to.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: Ipv4Addr,

    /// Stream endpoint a terminal node bridges to.
    #[serde(default = "default_terminal_addr")]
    pub terminal_addr: SocketAddr,
}

fn default_port_low() -> u16 {
    50_000
}

fn default_port_high() -> u16 {
    60_000
}

fn default_bind_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_terminal_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 20004))
}

impl ExitConfig {
    fn validate(&self) -> Result<()> {
        if self.port_range_low == 0 {
            return Err(NodeError::config_invalid(
                "exit.port_range_low",
                "port cannot be 0",
            ));
        }
        if self.port_range_low > self.port_range_high {
            return Err(NodeError::config_invalid(
                "exit.port_range_high",
                "must not be below exit.port_range_low",
            ));
        }
        if self.terminal_addr.port() == 0 {
            return Err(NodeError::config_invalid(
                "exit.terminal_addr",
                "port cannot be 0",
            ));
        }
        Ok(())
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            port_range_low: default_port_low(),
            port_range_high: default_port_high(),
            bind_ip: default_bind_ip(),
            terminal_addr: default_terminal_addr(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const MIX_TOML: &str = r#"
        [node]
        role = "mix"
        listen_addr = "127.0.0.1:40002"

        [hops]
        next = "127.0.0.1:40003"

        [keys]
        onion_secret = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        previous_shared_secret = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        next_shared_secret = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

        [mixing]
        request_threshold = 4
        response_threshold = 2

        [limits]
        channel_timeout_secs = 60

        [logging]
        level = "debug"
    "#;

    #[test]
    fn test_mix_config() {
        let config = NodeConfig::from_str(MIX_TOML).unwrap();
        assert_eq!(config.role(), NodeRole::Mix);
        assert_eq!(config.listen_addr().port(), 40002);
        assert_eq!(config.hops.previous, None);
        assert_eq!(config.mixing.request_threshold, 4);
        assert_eq!(config.mixing.response_threshold, 2);
        assert_eq!(config.limits.channel_timeout(), Duration::from_secs(60));
        assert_eq!(config.limits.cleanup_interval_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::from_str(MIX_TOML).unwrap();
        let restored = NodeConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(restored.role(), NodeRole::Mix);
        assert_eq!(restored.mixing.request_threshold, 4);
        assert_eq!(restored.keys.previous_shared_secret, config.keys.previous_shared_secret);
    }

    #[test]
    fn test_exit_defaults() {
        let config = ExitConfig::default();
        assert_eq!(config.port_range_low, 50_000);
        assert_eq!(config.port_range_high, 60_000);
        assert_eq!(config.terminal_addr, "127.0.0.1:20004".parse().unwrap());
    }

    #[test]
    fn test_entry_requires_hop_keys() {
        let toml = r#"
            [node]
            role = "entry"

            [hops]
            next = "127.0.0.1:40002"

            [keys]
            next_shared_secret = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        "#;
        let err = NodeConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, NodeError::ConfigMissing { ref field } if field == "keys.hop_public_keys"));
    }

    #[test]
    fn test_exit_rejects_next_hop() {
        let toml = r#"
            [node]
            role = "exit"

            [hops]
            next = "127.0.0.1:40004"

            [keys]
            key_file = "/tmp/exit.json"
            previous_link_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        "#;
        let err = NodeConfig::from_str(toml).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let toml = MIX_TOML.replace("request_threshold = 4", "request_threshold = 0");
        assert!(NodeConfig::from_str(&toml).is_err());
    }

    #[test]
    fn test_threshold_above_replay_tolerance_rejected() {
        let toml = MIX_TOML.replace("response_threshold = 2", "response_threshold = 16");
        let err = NodeConfig::from_str(&toml).unwrap_err();
        assert!(matches!(err, NodeError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("response_threshold"));

        let at_cap = MIX_TOML.replace(
            "response_threshold = 2",
            &format!("response_threshold = {MAX_BATCH_THRESHOLD}"),
        );
        assert!(NodeConfig::from_str(&at_cap).is_ok());

        let above = MIX_TOML.replace(
            "request_threshold = 4",
            &format!("request_threshold = {}", MAX_BATCH_THRESHOLD + 1),
        );
        assert!(NodeConfig::from_str(&above).is_err());
    }

    #[test]
    fn test_channel_cipher_selection() {
        let config = NodeConfig::from_str(MIX_TOML).unwrap();
        assert_eq!(config.mixing.channel_cipher, "chacha20-ctr");

        let aead = MIX_TOML.replace(
            "response_threshold = 2",
            "response_threshold = 2\nchannel_cipher = \"chacha20-poly1305\"",
        );
        let config = NodeConfig::from_str(&aead).unwrap();
        assert_eq!(config.mixing.channel_cipher, "chacha20-poly1305");

        let unknown = MIX_TOML.replace(
            "response_threshold = 2",
            "response_threshold = 2\nchannel_cipher = \"aes-cbc\"",
        );
        let err = NodeConfig::from_str(&unknown).unwrap_err();
        assert!(err.to_string().contains("mixing.channel_cipher"));
    }

    #[test]
    fn test_cleanup_interval_bounded_by_timeout() {
        let toml = MIX_TOML.replace("channel_timeout_secs = 60", "channel_timeout_secs = 10");
        let err = NodeConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_secs"));
    }

    #[test]
    fn test_mix_missing_link_material() {
        let toml = MIX_TOML.replace(
            "previous_shared_secret = \"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\"",
            "",
        );
        let err = NodeConfig::from_str(&toml).unwrap_err();
        assert!(matches!(err, NodeError::ConfigMissing { .. }));
    }

    #[test]
    fn test_role_parsing() {
        for (name, role) in [
            ("entry", NodeRole::Entry),
            ("mix", NodeRole::Mix),
            ("exit", NodeRole::Exit),
            ("terminal", NodeRole::Terminal),
        ] {
            let section: NodeSection =
                toml::from_str(&format!("role = \"{name}\"")).unwrap();
            assert_eq!(section.role, role);
            assert_eq!(role.to_string(), name);
        }
        assert!(NodeRole::Terminal.is_last_hop());
        assert!(!NodeRole::Entry.needs_onion_key());
    }
}
