// ============================================
// File: crates/mixnet-node/src/lib.rs
// ============================================
//! # Mixnet Node Library
//!
//! ## Creation Reason
//! Provides the node side of the mix network: per-role channel state
//! machines, the services they share, and the drivers that run them on a
//! UDP relay socket.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML node configuration
//! - [`keys`]: key files and link secret agreement
//! - [`channels`]: entry, mid and exit channel registries
//! - [`services`]: mixing store, neighbour links, destination tasks
//! - [`drivers`]: node orchestration and per-role event loops
//! - [`error`]: node error types
//!
//! ## Architecture Overview
//! ```text
//! ┌────────┐ dest‖payload ┌───────┐  link  ┌─────┐  link  ┌──────┐ datagram ┌─────────────┐
//! │ client │ ───────────► │ Entry │ ─────► │ Mix │ ─────► │ Exit │ ───────► │ destination │
//! │        │ ◄─────────── │       │ ◄───── │     │ ◄───── │      │ ◄─────── │             │
//! └────────┘   payload    └───────┘        └─────┘        └──────┘          └─────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every node on a path must agree on `MAX_HOPS` and `PACKET_SIZE`
//! - Configuration changes require a restart
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod config;
pub mod drivers;
pub mod error;
pub mod keys;
pub mod services;

// Re-export primary types
pub use config::{NodeConfig, NodeRole};
pub use drivers::{Node, NodeHandle};
pub use error::{NodeError, Result};
pub use keys::{KeyFile, NodeKeys};
