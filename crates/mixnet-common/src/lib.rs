// ============================================
// File: crates/mixnet-common/src/lib.rs
// ============================================
//! # Mixnet Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides the identifiers, counters and liveness timestamps that every
//! other mixnet crate agrees on, so channel ids and destinations have a
//! single wire representation.
//!
//! ## Main Functionality
//! - [`types`]: `ChannelId`, `Destination`, `Counter`
//! - [`time`]: `AtomicInstant` for channel liveness tracking
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               mixnet-node                           │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   mixnet-core          mixnet-transport            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             mixnet-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Wire encodings here (channel id, destination) are shared by all hops;
//!   changing them breaks interoperability between node versions
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use time::AtomicInstant;
pub use types::{ChannelId, Counter, Destination, CHANNEL_ID_SIZE, COUNTER_LEN, DESTINATION_LEN};
