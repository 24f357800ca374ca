// ============================================
// File: crates/mixnet-node/src/drivers/exit.rs
// ============================================
//! # Exit Driver
//!
//! ## Creation Reason
//! Runs the last hop, for both plain exits (one UDP socket per channel)
//! and terminal nodes (one stream per channel to a fixed local endpoint).
//! The two differ only in the `DestinationConnector` they are given.
//!
//! ## Main Functionality
//! - Requests from the previous hop go through the `ExitRegistry`
//! - `Connect` actions start a connect task; outcomes come back as
//!   `DestinationEvent`s on the inbox
//! - Destination responses are queued in the registry; each tick moves at
//!   most one fragment per channel into the response store
//!
//! ## ⚠️ Important Note for Next Developer
//! - A channel evicted while its connect is in flight gets its link closed
//!   as soon as the `Connected` event arrives
//! - A destination link that closes takes its channel down with it
//! - Never push a whole fragmented response into the store at once; the
//!   store may shuffle it beyond what the entry's replay window accepts
//!
//! ## Last Modified
//! v0.1.0 - Initial exit driver
//! v0.1.1 - Tick-paced responses

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mixnet_common::ChannelId;
use mixnet_core::crypto::SymmetricChannelCipher;
use mixnet_core::protocol::ChannelPacket;
use mixnet_transport::{DestinationConnector, Transport};

use super::{flush, required, DropStats, PeerAddrs, Side, RECV_BUFFER};
use crate::channels::{ExitAction, ExitRegistry};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::keys::NodeKeys;
use crate::services::{spawn_connect, DestinationEvent, DestinationHandle, MixStore, NeighbourLink};

/// Depth of the destination event inbox.
const EVENT_INBOX: usize = 1024;

/// Driver of an exit or terminal node.
pub struct ExitDriver {
    transport: Arc<dyn Transport>,
    registry: ExitRegistry,
    peers: PeerAddrs,
    previous_link: NeighbourLink,
    responses: MixStore<ChannelPacket>,
    connector: Arc<dyn DestinationConnector>,
    destinations: HashMap<ChannelId, DestinationHandle>,
    events_tx: mpsc::Sender<DestinationEvent>,
    events_rx: Option<mpsc::Receiver<DestinationEvent>>,
    tick_interval: Duration,
    cleanup_interval: Duration,
    stats: DropStats,
}

impl ExitDriver {
    /// Builds the driver from configuration and decoded keys.
    ///
    /// # Errors
    /// `ConfigMissing` without an onion key or a previous link secret.
    pub fn new(
        config: &NodeConfig,
        keys: NodeKeys,
        cipher: Arc<dyn SymmetricChannelCipher>,
        connector: Arc<dyn DestinationConnector>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let onion = required(keys.onion, "keys.onion_secret")?;
        let previous_link = NeighbourLink::towards_previous(required(
            keys.previous_link.as_ref(),
            "keys.previous_link_key",
        )?)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_INBOX);

        Ok(Self {
            transport,
            registry: ExitRegistry::new(
                onion,
                cipher,
                config.limits.max_channels,
                config.limits.channel_timeout(),
            ),
            peers: PeerAddrs::new(config.hops.previous, None),
            previous_link,
            responses: MixStore::new(config.mixing.response_threshold),
            connector,
            destinations: HashMap::new(),
            events_tx,
            events_rx: Some(events_rx),
            tick_interval: config.limits.tick_interval(),
            cleanup_interval: config.limits.cleanup_interval(),
            stats: DropStats::default(),
        })
    }

    /// Runs until the shutdown signal fires, then closes every link.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let transport = Arc::clone(&self.transport);
        let Some(mut events) = self.events_rx.take() else {
            error!("Exit driver started twice");
            return;
        };
        let mut buf = vec![0u8; RECV_BUFFER];
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(self.cleanup_interval);

        info!(
            connector = self.connector.name(),
            previous = ?self.peers.previous(),
            "Exit driver started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Exit driver received shutdown signal");
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
                Some(event) = events.recv() => self.on_destination_event(event).await,
                _ = tick.tick() => {
                    let packets = self.registry.tick();
                    if !packets.is_empty() {
                        self.responses.extend(packets);
                        self.flush_responses().await;
                    }
                }
                _ = cleanup.tick() => self.cleanup().await,
            }
        }

        for (_, handle) in self.destinations.drain() {
            handle.close().await;
        }
        debug!("Exit driver exiting");
    }

    async fn on_datagram(&mut self, data: &[u8], source: SocketAddr) {
        match self.peers.classify(source) {
            Some(Side::Previous) => {}
            Some(Side::Next) | None => {
                self.stats.record_stranger(source);
                return;
            }
        }

        let action = match self.open_request(data) {
            Ok(action) => action,
            Err(e) => {
                self.stats.record(&e, source);
                return;
            }
        };

        match action {
            Some(ExitAction::Connect {
                channel_id,
                destination,
            }) => {
                spawn_connect(
                    Arc::clone(&self.connector),
                    channel_id,
                    destination,
                    self.events_tx.clone(),
                );
            }
            Some(ExitAction::Deliver {
                channel_id,
                payload,
            }) => self.deliver(channel_id, payload),
            None => {}
        }
    }

    fn open_request(&mut self, data: &[u8]) -> Result<Option<ExitAction>> {
        let packet = self.previous_link.open(data)?;
        self.registry.handle_request(packet)
    }

    fn deliver(&self, channel_id: ChannelId, payload: Vec<u8>) {
        match self.destinations.get(&channel_id) {
            Some(handle) => {
                handle.send(payload);
            }
            None => debug!(channel_id = %channel_id, "No destination link for delivery"),
        }
    }

    async fn on_destination_event(&mut self, event: DestinationEvent) {
        match event {
            DestinationEvent::Connected { channel_id, link } => {
                let Some(established) = self.registry.on_connected(channel_id) else {
                    debug!(channel_id = %channel_id, "Channel gone before connect finished");
                    link.close().await;
                    return;
                };

                let handle = DestinationHandle::spawn(channel_id, link, self.events_tx.clone());
                for message in established.queued {
                    handle.send(message);
                }
                if let Some(previous) = self.destinations.insert(channel_id, handle) {
                    previous.close().await;
                }
                if let Some(confirm) = established.confirm {
                    self.responses.push(confirm);
                    self.flush_responses().await;
                }
            }
            DestinationEvent::ConnectFailed { channel_id, error } => {
                warn!(channel_id = %channel_id, error = %error, "Destination unreachable");
                self.registry.on_connect_failed(channel_id);
            }
            DestinationEvent::Response {
                channel_id,
                payload,
            } => {
                if let Err(e) = self.registry.handle_destination_response(channel_id, &payload) {
                    debug!(channel_id = %channel_id, error = %e, "Destination response dropped");
                }
            }
            DestinationEvent::Closed { channel_id } => {
                if self.registry.remove(channel_id) {
                    info!(channel_id = %channel_id, "Channel closed by destination");
                }
                if let Some(handle) = self.destinations.remove(&channel_id) {
                    handle.close().await;
                }
            }
        }
    }

    async fn cleanup(&mut self) {
        for channel_id in self.registry.cleanup_expired() {
            if let Some(handle) = self.destinations.remove(&channel_id) {
                handle.close().await;
            }
        }
        self.stats.report(self.registry.len());
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

impl std::fmt::Debug for ExitDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitDriver")
            .field("connector", &self.connector.name())
            .field("registry", &self.registry)
            .field("links", &self.destinations.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mixnet_core::crypto::{CtrChannelCipher, OnionKeyPair, SymmetricKey};
    use mixnet_transport::{MockConnector, UdpTransport};

    use crate::config::NodeRole;

    #[tokio::test]
    async fn test_exit_requires_previous_link() {
        let mut config = NodeConfig::default();
        config.node.role = NodeRole::Exit;
        let keys = NodeKeys {
            onion: Some(OnionKeyPair::generate()),
            ..NodeKeys::default()
        };
        let transport: Arc<dyn Transport> =
            Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());

        let result = ExitDriver::new(
            &config,
            keys,
            Arc::new(CtrChannelCipher::new()),
            Arc::new(MockConnector::new()),
            transport,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stranger_datagram_counted() {
        let config = NodeConfig::default();
        let keys = NodeKeys {
            onion: Some(OnionKeyPair::generate()),
            previous_link: Some(SymmetricKey::generate()),
            ..NodeKeys::default()
        };
        let transport: Arc<dyn Transport> =
            Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
        let mut driver = ExitDriver::new(
            &config,
            keys,
            Arc::new(CtrChannelCipher::new()),
            Arc::new(MockConnector::new()),
            transport,
        )
        .unwrap();

        let previous: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let stranger: SocketAddr = "127.0.0.1:4001".parse().unwrap();

        // Garbage from the first sender still fixes it as the previous hop.
        driver.on_datagram(&[0u8; 8], previous).await;
        driver.on_datagram(&[0u8; 8], stranger).await;
        assert_eq!(driver.peers.previous(), Some(previous));
        assert_eq!(driver.stats.dropped, 1);
        assert_eq!(driver.stats.strangers, 1);
        assert!(driver.registry.is_empty());
    }
}
