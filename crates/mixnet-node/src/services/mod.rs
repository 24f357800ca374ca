// ============================================
// File: crates/mixnet-node/src/services/mod.rs
// ============================================
//! # Node Services
//!
//! ## Creation Reason
//! Building blocks the role drivers share, kept apart from the channel
//! state machines so each can be tested on its own.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`batching`]: threshold-triggered shuffling store
//! - [`link`]: link-layer sealing state per neighbour
//! - [`destination`]: connect and I/O tasks for exit destinations
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Role Driver                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  relay socket ─► NeighbourLink::open ─► channel registry    │
//! │                                              │              │
//! │                                              ▼              │
//! │                    MixStore (request) / MixStore (response) │
//! │                                              │              │
//! │  relay socket ◄─ NeighbourLink::seal ◄───────┘              │
//! │                                                             │
//! │  exit only: destination tasks ◄──► DestinationEvent inbox   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - None of these types are shared between tasks except the event inbox
//!   of the destination tasks
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod batching;
pub mod destination;
pub mod link;

pub use batching::MixStore;
pub use destination::{connect_destination, spawn_connect, DestinationEvent, DestinationHandle};
pub use link::NeighbourLink;
