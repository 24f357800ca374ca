// ============================================
// File: crates/mixnet-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Provides foundational error types and result aliases used across
//! all mixnet crates, enabling consistent error handling.
//!
//! ## Main Functionality
//! - `CommonError`: Base error enum for identifier and address handling
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never include key material in error messages
//! - Each crate defines its own error type that wraps `CommonError`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::fmt;
use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Common error types shared across mixnet crates.
///
/// # Example
/// ```
/// use mixnet_common::error::{CommonError, Result};
///
/// fn validate_input(data: &[u8]) -> Result<()> {
///     if data.is_empty() {
///         return Err(CommonError::invalid_input("data", "cannot be empty"));
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    // ========================================
    // Validation Errors
    // ========================================

    /// Invalid input data provided.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the field or parameter
        field: String,
        /// Description of what's wrong
        reason: String,
    },

    /// Data length doesn't match expected size.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Only IPv4 destinations fit the 6-byte destination encoding.
    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),

    // ========================================
    // Resource Errors
    // ========================================

    /// Resource limit exceeded.
    #[error("Resource exhausted: {resource} (limit: {limit})")]
    ResourceExhausted {
        /// Name of the resource
        resource: String,
        /// The limit that was exceeded
        limit: String,
    },
}

impl CommonError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidLength` error.
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }

    /// Creates a `ResourceExhausted` error.
    pub fn resource_exhausted(resource: impl Into<String>, limit: impl fmt::Display) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
            limit: limit.to_string(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error was caused by bad input rather than
    /// by local state.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::InvalidLength { .. } | Self::UnsupportedAddress(_)
        )
    }
}

// ============================================
// Tests
// ============================================
