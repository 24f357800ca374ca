// ============================================
// File: crates/mixnet-node/src/channels/mod.rs
// ============================================
//! # Channel State Machines
//!
//! ## Creation Reason
//! Holds the per-role channel tables. Each registry is owned by exactly one
//! driver task and turns one incoming channel packet into zero or more
//! outgoing ones, without doing any I/O itself.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`entry`]: client side; onion init, request layering, response peeling
//! - [`mid`]: one layer off requests, one layer onto responses
//! - [`exit`]: terminates channels and bridges them to destinations
//! - [`id_table`]: incoming/outgoing id bijection used by [`mid`]
//!
//! ## Packet Flow
//! ```text
//!   client ──► Entry ──INIT/DATA──► Mid ──► ... ──► Exit ──► destination
//!   client ◄── Entry ◄─DATA/CONFIRM─ Mid ◄── ... ◄── Exit ◄── destination
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every DATA, INIT and CONFIRM payload is exactly `PACKET_SIZE` bytes
//!   on every hop; the helpers here re-pad with random filler
//! - Registries are not thread-safe on purpose: one driver task owns each
//! - Every hop runs with the same channel timeout and cleanup interval; the
//!   retired id hold below relies on it
//!
//! ## Last Modified
//! v0.1.0 - Initial channel registries

pub mod entry;
pub mod exit;
pub mod id_table;
pub mod mid;

pub use entry::{ClientDelivery, EntryRegistry};
pub use exit::{Established, ExitAction, ExitRegistry};
pub use id_table::{IdTable, RetiredIds};
pub use mid::MidRegistry;

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;

use mixnet_core::error::CoreError;
use mixnet_core::protocol::CTR_PREFIX_LEN;

/// Random counter for INIT headers, which are never replay-checked.
pub(crate) fn random_counter() -> u64 {
    OsRng.next_u64()
}

/// How long an expired channel id stays unallocatable.
///
/// The next hop drops its end of a channel within one timeout plus one
/// cleanup interval of the last request, and the cleanup interval never
/// exceeds the timeout.
pub(crate) fn retired_id_hold(channel_timeout: Duration) -> Duration {
    channel_timeout.saturating_mul(2)
}

/// Right-pads `data` with random bytes up to `len`.
pub(crate) fn pad_random(data: &mut Vec<u8>, len: usize) {
    let start = data.len();
    if start >= len {
        return;
    }
    data.resize(len, 0);
    OsRng.fill_bytes(&mut data[start..]);
}

/// Splits the leading big-endian counter off a decrypted layer.
pub(crate) fn split_counter(data: &[u8]) -> Result<(u64, &[u8]), CoreError> {
    if data.len() < CTR_PREFIX_LEN {
        return Err(CoreError::too_short(CTR_PREFIX_LEN, data.len()));
    }
    let (prefix, rest) = data.split_at(CTR_PREFIX_LEN);
    let mut raw = [0u8; CTR_PREFIX_LEN];
    raw.copy_from_slice(prefix);
    Ok((u64::from_be_bytes(raw), rest))
}

// ============================================
// Tests
// ============================================
