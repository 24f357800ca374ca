// ============================================
// File: crates/mixnet-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for the relay socket and for the exit-side
//! destination connectors.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system errors
//! - Categorization of retryable vs channel-fatal errors
//!
//! ## Error Categories
//! 1. **Network Errors**: UDP send/receive failures on the relay socket
//! 2. **Destination Errors**: connect/handshake failures at the exit
//! 3. **Configuration Errors**: Invalid addresses, port ranges
//!
//! ## ⚠️ Important Note for Next Developer
//! - Relay socket errors are often transient and retryable
//! - Destination errors are channel-fatal: the exit tears the channel down
//!   and never retries
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use mixnet_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Network Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Send operation failed.
    #[error("Failed to send to {dest}: {reason}")]
    SendFailed {
        /// Destination address
        dest: SocketAddr,
        /// Why send failed
        reason: String,
    },

    /// Receive operation failed.
    #[error("Failed to receive: {reason}")]
    ReceiveFailed {
        /// Why receive failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: SocketAddr,
    },

    // ========================================
    // Destination Errors
    // ========================================

    /// Could not reach the destination of a channel.
    #[error("Failed to connect to {dest}: {reason}")]
    ConnectFailed {
        /// Destination address
        dest: SocketAddr,
        /// Why the connect failed
        reason: String,
    },

    /// The terminal stream endpoint rejected or garbled the connect record.
    #[error("Terminal handshake failed: {reason}")]
    HandshakeFailed {
        /// What went wrong
        reason: String,
    },

    /// No free local port was found in the configured range.
    #[error("No free port in {low}..={high}")]
    PortRangeExhausted {
        /// Lower bound of the range
        low: u16,
        /// Upper bound of the range
        high: u16,
    },

    /// The destination link was closed by the peer or locally.
    #[error("Destination link closed")]
    Closed,

    // ========================================
    // Configuration Errors
    // ========================================

    /// Invalid configuration.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Configuration field name
        field: String,
        /// Why it's invalid
        reason: String,
    },

    /// Invalid IP address.
    #[error("Invalid IP address: {addr}")]
    InvalidAddress {
        /// The invalid address string
        addr: String,
    },

    /// Transport is shutting down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `ConnectFailed` error.
    pub fn connect_failed(dest: SocketAddr, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            dest,
            reason: reason.into(),
        }
    }

    /// Creates a `HandshakeFailed` error.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            Self::SendFailed { .. } | Self::ReceiveFailed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the owning channel must be torn down.
    #[must_use]
    pub const fn is_channel_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::HandshakeFailed { .. }
                | Self::PortRangeExhausted { .. }
                | Self::Closed
        )
    }

    /// Returns `true` if this is a relay-socket error.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::BindFailed { .. }
                | Self::SendFailed { .. }
                | Self::ReceiveFailed { .. }
                | Self::AddressInUse { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::bind_failed("127.0.0.1:8080".parse().unwrap(), "address in use");
        assert!(err.to_string().contains("127.0.0.1:8080"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_error_classification() {
        let network_err = TransportError::SendFailed {
            dest: "127.0.0.1:8080".parse().unwrap(),
            reason: "timeout".into(),
        };
        assert!(network_err.is_network_error());
        assert!(network_err.is_retryable());
        assert!(!network_err.is_channel_fatal());

        let dest_err =
            TransportError::connect_failed("127.0.0.2:23456".parse().unwrap(), "refused");
        assert!(dest_err.is_channel_fatal());
        assert!(!dest_err.is_retryable());
        assert!(TransportError::PortRangeExhausted { low: 1, high: 2 }.is_channel_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        let transport_err: TransportError = io_err.into();
        assert!(transport_err.is_retryable());
    }
}
