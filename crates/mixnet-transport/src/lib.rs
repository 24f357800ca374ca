// ============================================
// File: crates/mixnet-transport/src/lib.rs
// ============================================
//! # Mixnet Transport - Network I/O Layer
//!
//! ## Creation Reason
//! Keeps every socket a mix node touches behind traits, so the channel
//! state machines and node drivers can be tested without a network.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Transport`, `DestinationConnector`, `DestinationLink`
//! - [`udp`]: UDP relay socket and UDP destination connector
//! - [`terminal`]: length-prefixed stream connector for the terminal hop
//! - [`mock`]: in-memory destination connector for tests
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 mixnet-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │    mixnet-core         mixnet-transport             │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │              mixnet-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//!  previous hop ──UDP──► [ UdpTransport ] ──UDP──► next hop
//!                              │
//!                     exit / terminal hop only
//!                              ▼
//!              [ DestinationConnector ] ──► destination
//!                 (UDP socket per channel, or one
//!                  framed TCP stream per channel)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through the traits so tests can swap in `mock`
//! - Destination errors are channel-fatal; the caller tears down the channel
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod mock;
pub mod terminal;
pub mod traits;
pub mod udp;

// Re-export primary types
pub use error::{Result, TransportError};
pub use mock::{MockConnector, MockLink};
pub use terminal::TerminalConnector;
pub use traits::{DestinationConnector, DestinationLink, PacketSource, Transport};
pub use udp::{UdpConnector, UdpTransport};
