// ============================================
// File: crates/mixnet-node/src/drivers/entry.rs
// ============================================
//! # Entry Driver
//!
//! ## Creation Reason
//! Runs the entry role: client datagrams and next-hop responses share the
//! relay socket, a tick interval paces the outgoing channel packets.
//!
//! ## Main Functionality
//! - Datagrams from the next hop are responses, everything else is a client
//! - Each tick yields one packet per channel into the request store
//! - Reassembled responses go back to the client address, raw
//!
//! ## ⚠️ Important Note for Next Developer
//! - Clients are not authenticated; the channel limit is the only guard
//! - Responses to clients pass through their own store and threshold
//!
//! ## Last Modified
//! v0.1.0 - Initial entry driver

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use mixnet_core::crypto::SymmetricChannelCipher;
use mixnet_core::protocol::ChannelPacket;
use mixnet_transport::Transport;

use super::{flush, required, DropStats, RECV_BUFFER};
use crate::channels::{ClientDelivery, EntryRegistry};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::keys::NodeKeys;
use crate::services::{MixStore, NeighbourLink};

/// Driver of an entry node.
pub struct EntryDriver {
    transport: Arc<dyn Transport>,
    registry: EntryRegistry,
    next: SocketAddr,
    link: NeighbourLink,
    requests: MixStore<ChannelPacket>,
    responses: MixStore<ClientDelivery>,
    tick_interval: Duration,
    cleanup_interval: Duration,
    stats: DropStats,
}

impl EntryDriver {
    /// Builds the driver from configuration and decoded keys.
    ///
    /// # Errors
    /// `ConfigMissing` without a next hop or next link secret,
    /// `ConfigInvalid` for a bad hop count.
    pub fn new(
        config: &NodeConfig,
        keys: NodeKeys,
        cipher: Arc<dyn SymmetricChannelCipher>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let next = required(config.hops.next, "hops.next")?;
        let secret = required(keys.next_link.as_ref(), "keys.next_link_key")?;
        let link = NeighbourLink::towards_next(secret)?;
        let registry = EntryRegistry::new(
            keys.hop_public_keys,
            cipher,
            config.limits.max_channels,
            config.limits.channel_timeout(),
        )?;

        Ok(Self {
            transport,
            registry,
            next,
            link,
            requests: MixStore::new(config.mixing.request_threshold),
            responses: MixStore::new(config.mixing.response_threshold),
            tick_interval: config.limits.tick_interval(),
            cleanup_interval: config.limits.cleanup_interval(),
            stats: DropStats::default(),
        })
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let transport = Arc::clone(&self.transport);
        let mut buf = vec![0u8; RECV_BUFFER];
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(self.cleanup_interval);

        info!(
            next = %self.next,
            hops = self.registry.hop_count(),
            "Entry driver started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Entry driver received shutdown signal");
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
                _ = tick.tick() => {
                    let packets = self.registry.tick();
                    self.requests.extend(packets);
                    self.flush_requests().await;
                }
                _ = cleanup.tick() => {
                    self.registry.cleanup_expired();
                    self.stats.report(self.registry.len());
                }
            }
        }

        debug!("Entry driver exiting");
    }

    async fn on_datagram(&mut self, data: &[u8], source: SocketAddr) {
        if source != self.next {
            match self.registry.request(source, data) {
                Ok(channel_id) => {
                    trace!(channel_id = %channel_id, client = %source, "Client datagram accepted");
                }
                Err(e) => self.stats.record(&e, source),
            }
            return;
        }

        match self.open_response(data) {
            Ok(Some(delivery)) => {
                self.responses.push(delivery);
                self.flush_responses().await;
            }
            Ok(None) => {}
            Err(e) => self.stats.record(&e, source),
        }
    }

    fn open_response(&mut self, data: &[u8]) -> Result<Option<ClientDelivery>> {
        let packet = self.link.open(data)?;
        self.registry.handle_response(packet)
    }

    async fn flush_requests(&mut self) {
        flush(
            self.transport.as_ref(),
            &mut self.requests,
            &mut self.link,
            self.next,
        )
        .await;
    }

    async fn flush_responses(&mut self) {
        for delivery in self.responses.take_batch() {
            if let Err(e) = self
                .transport
                .send(&delivery.payload, &delivery.client)
                .await
            {
                debug!(client = %delivery.client, error = %e, "Client send failed");
            }
        }
    }
}

impl std::fmt::Debug for EntryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryDriver")
            .field("next", &self.next)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
