// ============================================
// File: crates/mixnet-node/src/error.rs
// ============================================
//! # Node Error Types
//!
//! ## Creation Reason
//! One error type for the channel registries, configuration and the node
//! drivers, wrapping the lower crates' errors.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Packet-level errors are logged and dropped by the drivers, never
//!   propagated out of the event loop
//! - Only configuration and startup errors end the process
//!
//! ## Last Modified
//! v0.1.0 - Initial node errors

use std::net::SocketAddr;

use thiserror::Error;

use mixnet_common::error::CommonError;
use mixnet_common::ChannelId;
use mixnet_core::error::CoreError;
use mixnet_core::MessageType;
use mixnet_transport::error::TransportError;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Node error types.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    ConfigMissing { field: String },

    #[error("Failed to read key file '{path}': {reason}")]
    KeyFile { path: String, reason: String },

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Unexpected {msg_type:?} on channel {channel_id}: {reason}")]
    UnexpectedMessage {
        channel_id: ChannelId,
        msg_type: MessageType,
        reason: String,
    },

    #[error("Invalid client datagram from {from_addr}: {reason}")]
    InvalidClientDatagram { from_addr: String, reason: String },

    #[error("Channel limit reached: max {limit} channels")]
    ChannelLimitReached { limit: usize },

    #[error("Node failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error("Node is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn config_missing(field: impl Into<String>) -> Self {
        Self::ConfigMissing {
            field: field.into(),
        }
    }

    pub fn key_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unexpected(
        channel_id: ChannelId,
        msg_type: MessageType,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnexpectedMessage {
            channel_id,
            msg_type,
            reason: reason.into(),
        }
    }

    pub fn invalid_client_datagram(source: SocketAddr, reason: impl Into<String>) -> Self {
        Self::InvalidClientDatagram {
            from_addr: source.to_string(),
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::ConfigInvalid { .. }
                | Self::ConfigMissing { .. }
                | Self::KeyFile { .. }
        )
    }

    /// Returns `true` if the offending packet is dropped and the node goes
    /// on with the next one.
    #[must_use]
    pub const fn is_packet_drop(&self) -> bool {
        match self {
            Self::Core(e) => e.is_packet_fatal(),
            Self::UnknownChannel(_)
            | Self::UnexpectedMessage { .. }
            | Self::InvalidClientDatagram { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` for conditions worth counting as possible attacks.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        match self {
            Self::Core(e) => e.is_suspicious(),
            _ => false,
        }
    }

    /// Returns `true` if the channel the error belongs to must be removed.
    #[must_use]
    pub const fn is_channel_fatal(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_channel_fatal(),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::ConfigInvalid { .. }
                | Self::ConfigMissing { .. }
                | Self::KeyFile { .. }
                | Self::StartupFailed { .. }
        )
    }
}
