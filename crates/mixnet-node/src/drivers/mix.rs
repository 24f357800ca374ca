// ============================================
// File: crates/mixnet-node/src/drivers/mix.rs
// ============================================
//! # Mix Driver
//!
//! ## Creation Reason
//! Runs an intermediate hop: requests from the previous hop lose one
//! layer and go to the next, responses from the next hop gain one layer
//! and go back.
//!
//! ## Main Functionality
//! - Source address decides the direction
//! - Each direction has its own link keys, store and threshold
//!
//! ## ⚠️ Important Note for Next Developer
//! - Responses wait in their store until the previous hop is known
//!
//! ## Last Modified
//! v0.1.0 - Initial mix driver

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use mixnet_core::crypto::SymmetricChannelCipher;
use mixnet_core::protocol::ChannelPacket;
use mixnet_transport::Transport;

use super::{flush, required, DropStats, PeerAddrs, Side, RECV_BUFFER};
use crate::channels::MidRegistry;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::keys::NodeKeys;
use crate::services::{MixStore, NeighbourLink};

/// Driver of an intermediate hop.
pub struct MixDriver {
    transport: Arc<dyn Transport>,
    registry: MidRegistry,
    peers: PeerAddrs,
    next: SocketAddr,
    previous_link: NeighbourLink,
    next_link: NeighbourLink,
    requests: MixStore<ChannelPacket>,
    responses: MixStore<ChannelPacket>,
    cleanup_interval: Duration,
    stats: DropStats,
}

impl MixDriver {
    /// Builds the driver from configuration and decoded keys.
    ///
    /// # Errors
    /// `ConfigMissing` without an onion key, a next hop or either link
    /// secret.
    pub fn new(
        config: &NodeConfig,
        keys: NodeKeys,
        cipher: Arc<dyn SymmetricChannelCipher>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let next = required(config.hops.next, "hops.next")?;
        let onion = required(keys.onion, "keys.onion_secret")?;
        let previous_link = NeighbourLink::towards_previous(required(
            keys.previous_link.as_ref(),
            "keys.previous_link_key",
        )?)?;
        let next_link = NeighbourLink::towards_next(required(
            keys.next_link.as_ref(),
            "keys.next_link_key",
        )?)?;

        Ok(Self {
            transport,
            registry: MidRegistry::new(
                onion,
                cipher,
                config.limits.max_channels,
                config.limits.channel_timeout(),
            ),
            peers: PeerAddrs::new(config.hops.previous, Some(next)),
            next,
            previous_link,
            next_link,
            requests: MixStore::new(config.mixing.request_threshold),
            responses: MixStore::new(config.mixing.response_threshold),
            cleanup_interval: config.limits.cleanup_interval(),
            stats: DropStats::default(),
        })
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let transport = Arc::clone(&self.transport);
        let mut buf = vec![0u8; RECV_BUFFER];
        let mut cleanup = tokio::time::interval(self.cleanup_interval);

        info!(next = %self.next, previous = ?self.peers.previous(), "Mix driver started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Mix driver received shutdown signal");
                    break;
                }
                result = transport.recv(&mut buf) => {
                    match result {
                        Ok((len, source)) => self.on_datagram(&buf[..len], source.addr).await,
                        Err(e) => {
                            if !transport.is_active() {
                                break;
                            }
                            error!("Relay receive error: {}", e);
                        }
                    }
                }
                _ = cleanup.tick() => {
                    self.registry.cleanup_expired();
                    self.stats.report(self.registry.len());
                }
            }
        }

        debug!("Mix driver exiting");
    }

    async fn on_datagram(&mut self, data: &[u8], source: SocketAddr) {
        match self.peers.classify(source) {
            Some(Side::Previous) => match self.forward_request(data) {
                Ok(packet) => {
                    self.requests.push(packet);
                    flush(
                        self.transport.as_ref(),
                        &mut self.requests,
                        &mut self.next_link,
                        self.next,
                    )
                    .await;
                }
                Err(e) => self.stats.record(&e, source),
            },
            Some(Side::Next) => match self.forward_response(data) {
                Ok(packet) => {
                    self.responses.push(packet);
                    self.flush_responses().await;
                }
                Err(e) => self.stats.record(&e, source),
            },
            None => self.stats.record_stranger(source),
        }
    }

    fn forward_request(&mut self, data: &[u8]) -> Result<ChannelPacket> {
        let packet = self.previous_link.open(data)?;
        self.registry.handle_request(packet)
    }

    fn forward_response(&mut self, data: &[u8]) -> Result<ChannelPacket> {
        let packet = self.next_link.open(data)?;
        self.registry.handle_response(packet)
    }

    async fn flush_responses(&mut self) {
        let Some(previous) = self.peers.previous() else {
            return;
        };
        flush(
            self.transport.as_ref(),
            &mut self.responses,
            &mut self.previous_link,
            previous,
        )
        .await;
    }
}

impl std::fmt::Debug for MixDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixDriver")
            .field("peers", &self.peers)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
