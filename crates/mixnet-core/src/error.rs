// ============================================
// File: crates/mixnet-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to the onion, fragment, replay and link
//! encryption layers of the mixnet core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - Classification helpers so drivers can decide between "drop and log"
//!   and "surface to the caller"
//!
//! ## Error Categories
//! 1. **Packet-fatal**: malformed onion, authentication failure, replay,
//!    dummy payload. The single packet is dropped.
//! 2. **Resource exhaustion**: message ids or fragment indices ran out.
//!    The caller refuses the payload instead of truncating it. A full
//!    reassembly store is packet-fatal instead: the fragment is dropped.
//! 3. **Crypto setup**: invalid keys or failed derivation.
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - `DummyOrEmptyPayload` is normal cover traffic, not an attack signal
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use mixnet_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for protocol and cryptographic operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Key material could not be parsed or generated.
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// What is wrong with the key
        reason: String,
    },

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// Link-layer MAC did not verify.
    #[error("Link authentication failed")]
    LinkAuthenticationFailed,

    /// Link-layer encryption failed.
    #[error("Link encryption failed")]
    LinkEncryption,

    /// Sealed innermost channel layer did not verify.
    #[error("Channel authentication failed")]
    ChannelAuthenticationFailed,

    /// Sealing the innermost channel layer failed.
    #[error("Channel encryption failed")]
    ChannelEncryption,

    /// No channel cipher is registered under this name.
    #[error("Unknown channel cipher: {0}")]
    UnknownCipher(String),

    /// Counter was already seen or is older than the replay window.
    #[error("Replay detected: counter {counter} too old or already seen")]
    ReplayDetected {
        /// Rejected counter value
        counter: u64,
    },

    /// Onion init message could not be processed.
    #[error("Malformed onion message: {reason}")]
    MalformedOnionMessage {
        /// What's wrong with the onion
        reason: String,
    },

    // ========================================
    // Fragment Errors
    // ========================================

    /// Payload needs more fragments than one message id can index.
    #[error("Fragment too large: index {index} exceeds {max}")]
    FragmentTooLarge {
        /// Fragment index that was requested
        index: usize,
        /// Highest representable index
        max: usize,
    },

    /// Fragment carries no payload (cover traffic).
    #[error("Dummy or empty payload")]
    DummyOrEmptyPayload,

    /// Fragment generator was asked for more after exhaustion.
    #[error("No fragments left")]
    NoFragmentsLeft,

    /// Every message id in the issuer's range is in flight.
    #[error("Message ids exhausted in range {low}..={high}")]
    MessageIdsExhausted {
        /// Lowest id of the range
        low: u8,
        /// Highest id of the range
        high: u8,
    },

    /// Too many incomplete messages are waiting for fragments.
    #[error("Too many pending reassemblies: {current} (max {max})")]
    TooManyPendingMessages {
        /// Incomplete messages currently held
        current: usize,
        /// Configured maximum
        max: usize,
    },

    // ========================================
    // Protocol Errors
    // ========================================

    /// Unknown or unsupported message type.
    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Message is malformed.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Message is too short to be valid.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedOnionMessage` error.
    pub fn malformed_onion(reason: impl Into<String>) -> Self {
        Self::MalformedOnionMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooShort` error.
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Creates a `ReplayDetected` error.
    pub const fn replay(counter: u64) -> Self {
        Self::ReplayDetected { counter }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error might indicate an attack.
    ///
    /// These errors warrant additional logging/monitoring.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::LinkAuthenticationFailed
                | Self::ChannelAuthenticationFailed
                | Self::ReplayDetected { .. }
        )
    }

    /// Returns `true` if the error only dooms the packet that caused it.
    ///
    /// The driver drops such a packet and keeps running.
    #[must_use]
    pub const fn is_packet_fatal(&self) -> bool {
        matches!(
            self,
            Self::LinkAuthenticationFailed
                | Self::ChannelAuthenticationFailed
                | Self::ReplayDetected { .. }
                | Self::MalformedOnionMessage { .. }
                | Self::DummyOrEmptyPayload
                | Self::TooManyPendingMessages { .. }
                | Self::UnknownMessageType(_)
                | Self::MalformedMessage { .. }
                | Self::MessageTooShort { .. }
        )
    }

    /// Returns `true` for errors the caller must see instead of truncated
    /// output.
    #[must_use]
    pub const fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::FragmentTooLarge { .. } | Self::MessageIdsExhausted { .. }
        )
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
        let err = CoreError::too_short(523, 12);
        assert!(err.to_string().contains("523"));
        assert!(err.to_string().contains("12"));

        let err = CoreError::replay(7);
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::LinkAuthenticationFailed.is_suspicious());
        assert!(CoreError::replay(1).is_suspicious());
        assert!(!CoreError::DummyOrEmptyPayload.is_suspicious());
        assert!(CoreError::DummyOrEmptyPayload.is_packet_fatal());
        assert!(CoreError::malformed_onion("zero point").is_packet_fatal());

        let exhausted = CoreError::MessageIdsExhausted { low: 1, high: 127 };
        assert!(exhausted.is_resource_exhaustion());
        assert!(!exhausted.is_packet_fatal());

        assert!(CoreError::ChannelAuthenticationFailed.is_suspicious());
        assert!(CoreError::ChannelAuthenticationFailed.is_packet_fatal());

        let crowded = CoreError::TooManyPendingMessages { current: 64, max: 64 };
        assert!(crowded.is_packet_fatal());
        assert!(!crowded.is_suspicious());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
