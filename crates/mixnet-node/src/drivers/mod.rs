// ============================================
// File: crates/mixnet-node/src/drivers/mod.rs
// ============================================
//! # Node Orchestrator and Role Drivers
//!
//! ## Creation Reason
//! Ties configuration, keys, the relay socket and the channel registry of
//! one role together and runs them until shutdown.
//!
//! ## Main Functionality
//! - `Node`: builds the driver for the configured role and runs it
//! - `NodeHandle`: running driver task plus its shutdown signal
//!
//! ### Submodules
//! - [`entry`]: client datagrams in, onion channels out
//! - [`mix`]: one layer per direction between two neighbours
//! - [`exit`]: channel termination, UDP or terminal stream destinations
//!
//! ## Driver Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Driver task (select!)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  shutdown (broadcast) ─► break                              │
//! │  relay socket        ─► open ─► registry ─► MixStore ─► seal │
//! │  tick (entry, exit)  ─► at most one packet per channel      │
//! │  destination inbox   ─► exit registry (exit only)           │
//! │  cleanup interval    ─► evict idle channels                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One task owns each registry; nothing here is behind a lock
//! - A node without a configured previous hop learns it from the first
//!   datagram that does not come from the next hop, and keeps it
//! - Graceful shutdown waits up to 5 seconds for the driver task
//!
//! ## Last Modified
//! v0.1.0 - Initial node drivers

pub mod entry;
pub mod exit;
pub mod mix;

pub use entry::EntryDriver;
pub use exit::ExitDriver;
pub use mix::MixDriver;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mixnet_core::crypto::cipher_by_name;
use mixnet_core::protocol::ChannelPacket;
use mixnet_transport::{
    DestinationConnector, TerminalConnector, Transport, UdpConnector, UdpTransport,
};

use crate::config::{NodeConfig, NodeRole};
use crate::error::{NodeError, Result};
use crate::keys::NodeKeys;
use crate::services::{MixStore, NeighbourLink};

/// Receive buffer for the relay socket.
pub(crate) const RECV_BUFFER: usize = 65_535;

/// How long shutdown waits for the driver task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Node
// ============================================

/// One mix network node.
///
/// # Lifecycle
/// 1. Create with `Node::new(config, keys)`
/// 2. Run with `node.run().await`, or `start` it on a bound transport
/// 3. Shutdown via Ctrl+C or `NodeHandle::shutdown`
pub struct Node {
    config: NodeConfig,
    keys: NodeKeys,
    connector: Option<Arc<dyn DestinationConnector>>,
}

impl Node {
    #[must_use]
    pub fn new(config: NodeConfig, keys: NodeKeys) -> Self {
        Self {
            config,
            keys,
            connector: None,
        }
    }

    /// Replaces the destination connector the exit would build from its
    /// configuration.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn DestinationConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Binds the relay socket, runs until Ctrl+C, then shuts down.
    ///
    /// # Errors
    /// Returns error if the socket cannot be bound or the driver cannot be
    /// built from the configuration.
    pub async fn run(self) -> Result<()> {
        info!(
            "Starting mixnet node v{} as {}",
            env!("CARGO_PKG_VERSION"),
            self.config.role()
        );

        let listen_addr = self.config.listen_addr();
        let udp = Arc::new(
            UdpTransport::bind_addr(listen_addr)
                .await
                .map_err(|e| NodeError::startup_failed(format!("UDP bind failed: {e}")))?,
        );
        info!("Relay socket listening on {}", listen_addr);

        let handle = self.start(udp.clone())?;
        info!("Node started successfully");

        wait_for_shutdown().await;

        info!("Shutting down node...");
        handle.shutdown().await;

        if let Err(e) = udp.shutdown().await {
            warn!("UDP shutdown error: {}", e);
        }

        info!("Node shutdown complete");
        Ok(())
    }

    /// Spawns the driver of the configured role on `transport`.
    ///
    /// # Errors
    /// `ConfigMissing` if the keys or hops the role needs are absent.
    pub fn start(self, transport: Arc<dyn Transport>) -> Result<NodeHandle> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let role = self.config.role();
        let cipher = cipher_by_name(&self.config.mixing.channel_cipher)?;
        info!(cipher = cipher.name(), "Channel cipher selected");

        let task = match role {
            NodeRole::Entry => {
                let driver = EntryDriver::new(&self.config, self.keys, cipher, transport)?;
                tokio::spawn(driver.run(shutdown_rx))
            }
            NodeRole::Mix => {
                let driver = MixDriver::new(&self.config, self.keys, cipher, transport)?;
                tokio::spawn(driver.run(shutdown_rx))
            }
            NodeRole::Exit | NodeRole::Terminal => {
                let connector = match self.connector {
                    Some(connector) => connector,
                    None => build_connector(&self.config)?,
                };
                let driver =
                    ExitDriver::new(&self.config, self.keys, cipher, connector, transport)?;
                tokio::spawn(driver.run(shutdown_rx))
            }
        };

        Ok(NodeHandle {
            role,
            shutdown_tx,
            task,
        })
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("role", &self.config.role())
            .field("listen_addr", &self.config.listen_addr())
            .finish_non_exhaustive()
    }
}

fn build_connector(config: &NodeConfig) -> Result<Arc<dyn DestinationConnector>> {
    let connector: Arc<dyn DestinationConnector> = match config.role() {
        NodeRole::Terminal => Arc::new(TerminalConnector::new(config.exit.terminal_addr)),
        _ => Arc::new(UdpConnector::new(
            config.exit.bind_ip,
            config.exit.port_range_low,
            config.exit.port_range_high,
        )?),
    };
    info!(connector = connector.name(), "Destination connector ready");
    Ok(connector)
}

/// Waits for Ctrl+C.
async fn wait_for_shutdown() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

// ============================================
// NodeHandle
// ============================================

/// A running driver task.
#[derive(Debug)]
pub struct NodeHandle {
    role: NodeRole,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl NodeHandle {
    #[must_use]
    pub const fn role(&self) -> NodeRole {
        self.role
    }

    /// Signals the driver and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await {
            Ok(Ok(())) => debug!("Driver '{}' completed", self.role),
            Ok(Err(e)) => warn!("Driver '{}' failed: {}", self.role, e),
            Err(_) => warn!("Driver '{}' timed out during shutdown", self.role),
        }
    }
}

// ============================================
// Shared driver helpers
// ============================================

/// Which neighbour a relay datagram came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Previous,
    Next,
}

/// Neighbour addresses, with the previous hop learned if not configured.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PeerAddrs {
    previous: Option<SocketAddr>,
    next: Option<SocketAddr>,
}

impl PeerAddrs {
    pub(crate) const fn new(previous: Option<SocketAddr>, next: Option<SocketAddr>) -> Self {
        Self { previous, next }
    }

    /// Classifies a datagram source; `None` for a stranger.
    pub(crate) fn classify(&mut self, source: SocketAddr) -> Option<Side> {
        if self.next == Some(source) {
            return Some(Side::Next);
        }
        match self.previous {
            Some(previous) if previous == source => Some(Side::Previous),
            Some(_) => None,
            None => {
                info!(peer = %source, "Previous hop learned");
                self.previous = Some(source);
                Some(Side::Previous)
            }
        }
    }

    pub(crate) const fn previous(&self) -> Option<SocketAddr> {
        self.previous
    }
}

/// Dropped-packet bookkeeping of one driver.
#[derive(Debug, Default)]
pub(crate) struct DropStats {
    dropped: u64,
    suspicious: u64,
    strangers: u64,
}

impl DropStats {
    pub(crate) fn record(&mut self, err: &NodeError, peer: SocketAddr) {
        self.dropped += 1;
        if err.is_suspicious() {
            self.suspicious += 1;
            debug!(peer = %peer, error = %err, suspicious = true, "Packet dropped");
        } else if err.is_packet_drop() {
            debug!(peer = %peer, error = %err, "Packet dropped");
        } else {
            warn!(peer = %peer, error = %err, "Request refused");
        }
    }

    pub(crate) fn record_stranger(&mut self, peer: SocketAddr) {
        self.strangers += 1;
        debug!(peer = %peer, "Datagram from unknown peer dropped");
    }

    pub(crate) fn report(&self, channels: usize) {
        debug!(
            channels,
            dropped = self.dropped,
            suspicious = self.suspicious,
            strangers = self.strangers,
            "Cleanup cycle complete"
        );
    }
}

/// Releases a batch from `store`, link-seals it and sends it to `dest`.
pub(crate) async fn flush(
    transport: &dyn Transport,
    store: &mut MixStore<ChannelPacket>,
    link: &mut NeighbourLink,
    dest: SocketAddr,
) {
    for packet in store.take_batch() {
        match link.seal(&packet) {
            Ok(wire) => {
                if let Err(e) = transport.send(&wire, &dest).await {
                    debug!(peer = %dest, error = %e, "Relay send failed");
                }
            }
            Err(e) => warn!(channel_id = %packet.channel_id, error = %e, "Link seal failed"),
        }
    }
}

/// Unwraps an optional setting the role cannot run without.
pub(crate) fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| NodeError::config_missing(field))
}

// ============================================
// Tests
// ============================================
