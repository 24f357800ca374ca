// ============================================
// File: crates/mixnet-transport/src/udp.rs
// ============================================
//! # UDP Transport Implementation
//!
//! ## Creation Reason
//! Provides the UDP relay socket every node listens on, and the UDP
//! destination connector an exit hop uses to reach arbitrary destinations.
//!
//! ## Main Functionality
//! - `UdpTransport`: relay socket wrapping Tokio's UDP socket
//! - `UdpConnector`: binds one ephemeral socket per channel from a port range
//! - `UdpDestinationLink`: the connected per-channel socket
//!
//! ## Design Choices
//! - Uses SO_REUSEADDR for quick rebinding after restart
//! - Ephemeral destination ports come from a configured range
//!   (default `50000..=60000`) and are picked at random
//! - A port held by a live link is never handed out twice
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless: `connect` only fixes the peer address, a
//!   refused destination shows up later as an ICMP-driven recv error
//! - Maximum UDP payload is ~65507 bytes
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP transport implementation

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use mixnet_common::{ChannelId, Destination};

use crate::error::{Result, TransportError};
use crate::traits::{DestinationConnector, DestinationLink, PacketSource, Transport};

// ============================================
// Constants
// ============================================

/// Largest datagram read from a destination socket.
pub const UDP_MTU: usize = 65_507;

/// Default ephemeral port range for destination sockets.
pub const DEFAULT_PORT_RANGE: (u16, u16) = (50_000, 60_000);

fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::io("creating UDP socket", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::io("setting non-blocking", e))?;

    socket.bind(&addr.into()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            TransportError::AddressInUse { addr }
        } else {
            TransportError::bind_failed(addr, e.to_string())
        }
    })?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| TransportError::io("converting to Tokio socket", e))
}

// ============================================
// UdpTransport
// ============================================

/// UDP relay socket.
///
/// # Example
/// ```ignore
/// use mixnet_transport::UdpTransport;
///
/// let transport = UdpTransport::bind("0.0.0.0:20000").await?;
///
/// let mut buf = [0u8; 1500];
/// let (len, source) = transport.recv(&mut buf).await?;
/// transport.send(&buf[..len], &next_hop).await?;
/// ```
pub struct UdpTransport {
    /// Underlying UDP socket
    socket: Arc<UdpSocket>,
    /// Local address we're bound to
    local_addr: SocketAddr,
    /// Shutdown flag
    shutdown: AtomicBool,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address.
    ///
    /// # Errors
    /// - `InvalidAddress`: If the string does not parse
    /// - `BindFailed`: If binding fails
    /// - `AddressInUse`: If address is already in use
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let addr_str = addr.as_ref();
        let socket_addr: SocketAddr =
            addr_str
                .parse()
                .map_err(|_| TransportError::InvalidAddress {
                    addr: addr_str.to_string(),
                })?;

        Self::bind_addr(socket_addr).await
    }

    /// Creates a new UDP transport bound to the specified socket address.
    ///
    /// # Errors
    /// Returns error if binding fails.
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        info!("Binding UDP relay socket to {}", addr);

        let tokio_socket = bind_socket(addr)?;
        let local_addr = tokio_socket
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!("UDP relay socket bound to {}", local_addr);

        Ok(Self {
            socket: Arc::new(tokio_socket),
            local_addr,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Checks if the transport has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }

        let (len, addr) =
            self.socket
                .recv_from(buf)
                .await
                .map_err(|e| TransportError::ReceiveFailed {
                    reason: e.to_string(),
                })?;

        trace!("Received {} bytes from {}", len, addr);

        Ok((len, PacketSource::new(addr)))
    }

    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }

        let len = self
            .socket
            .send_to(buf, dest)
            .await
            .map_err(|e| TransportError::SendFailed {
                dest: *dest,
                reason: e.to_string(),
            })?;

        trace!("Sent {} bytes to {}", len, dest);

        Ok(len)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("Shutting down UDP relay socket");
        self.shutdown.store(true, Ordering::Release);
        info!("UDP relay socket shutdown complete");
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.is_shutdown()
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================
// UdpConnector
// ============================================

/// Opens one connected UDP socket per exit channel.
///
/// Each socket is bound to a random port from `[low, high]` that no live
/// link of this connector holds. Bind attempts are retried with fresh
/// random ports; after as many attempts as the range has ports the connect
/// fails with `PortRangeExhausted`.
#[derive(Debug)]
pub struct UdpConnector {
    bind_ip: Ipv4Addr,
    low: u16,
    high: u16,
    ports_in_use: Arc<Mutex<HashSet<u16>>>,
}

impl UdpConnector {
    /// Creates a connector binding on `bind_ip` within `[low, high]`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the range is empty or contains port 0.
    pub fn new(bind_ip: Ipv4Addr, low: u16, high: u16) -> Result<Self> {
        if low == 0 || low > high {
            return Err(TransportError::invalid_config(
                "port_range",
                format!("invalid range {low}..={high}"),
            ));
        }
        Ok(Self {
            bind_ip,
            low,
            high,
            ports_in_use: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Number of ports currently held by live links.
    #[must_use]
    pub fn ports_in_use(&self) -> usize {
        self.ports_in_use.lock().len()
    }

    fn reserve_random_port(&self) -> Option<u16> {
        let mut in_use = self.ports_in_use.lock();
        let span = usize::from(self.high - self.low) + 1;
        if in_use.len() >= span {
            return None;
        }
        let mut rng = rand::thread_rng();
        loop {
            let port = rng.gen_range(self.low..=self.high);
            if in_use.insert(port) {
                return Some(port);
            }
        }
    }

    fn release_port(&self, port: u16) {
        self.ports_in_use.lock().remove(&port);
    }
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            low: DEFAULT_PORT_RANGE.0,
            high: DEFAULT_PORT_RANGE.1,
            ports_in_use: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl DestinationConnector for UdpConnector {
    async fn connect(
        &self,
        channel_id: ChannelId,
        destination: Destination,
    ) -> Result<Arc<dyn DestinationLink>> {
        let dest = destination.socket_addr();
        let attempts = usize::from(self.high - self.low) + 1;

        for _ in 0..attempts {
            let Some(port) = self.reserve_random_port() else {
                break;
            };
            let local = SocketAddr::V4(SocketAddrV4::new(self.bind_ip, port));

            let socket = match bind_socket(local) {
                Ok(socket) => socket,
                Err(e) => {
                    // Taken by another process; try another one.
                    trace!(port, error = %e, "Ephemeral port unavailable");
                    self.release_port(port);
                    continue;
                }
            };

            if let Err(e) = socket.connect(dest).await {
                self.release_port(port);
                return Err(TransportError::connect_failed(dest, e.to_string()));
            }

            debug!(
                channel_id = %channel_id,
                local = %local,
                dest = %dest,
                "Opened destination socket"
            );

            return Ok(Arc::new(UdpDestinationLink {
                socket,
                local_addr: local,
                peer: dest,
                port,
                ports_in_use: Arc::clone(&self.ports_in_use),
                closed: AtomicBool::new(false),
            }));
        }

        warn!(low = self.low, high = self.high, "No free destination port");
        Err(TransportError::PortRangeExhausted {
            low: self.low,
            high: self.high,
        })
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

// ============================================
// UdpDestinationLink
// ============================================

/// A UDP socket connected to one channel's destination.
///
/// The port goes back to the connector's pool when the link is dropped.
pub struct UdpDestinationLink {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer: SocketAddr,
    port: u16,
    ports_in_use: Arc<Mutex<HashSet<u16>>>,
    closed: AtomicBool,
}

#[async_trait]
impl DestinationLink for UdpDestinationLink {
    async fn send(&self, message: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed {
                dest: self.peer,
                reason: e.to_string(),
            })
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; UDP_MTU];
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            match self.socket.recv(&mut buf).await {
                Ok(len) => {
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    debug!(peer = %self.peer, "Destination refused datagram");
                }
                Err(e) => {
                    return Err(TransportError::ReceiveFailed {
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for UdpDestinationLink {
    fn drop(&mut self) {
        self.ports_in_use.lock().remove(&self.port);
    }
}

impl std::fmt::Debug for UdpDestinationLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpDestinationLink")
            .field("local_addr", &self.local_addr)
            .field("peer", &self.peer)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();

        let message = b"fixed size mix packet";
        client.send(message, &server_addr).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, source) = server.recv(&mut buf).await.unwrap();

        assert_eq!(&buf[..len], message);
        assert_eq!(source.addr, client_addr);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        assert!(transport.is_active());

        transport.shutdown().await.unwrap();
        assert!(!transport.is_active());

        let mut buf = [0u8; 1024];
        let result = transport.recv(&mut buf).await;
        assert!(matches!(result, Err(TransportError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = UdpTransport::bind("not-an-address").await;
        assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
    }

    #[test]
    fn test_connector_rejects_bad_range() {
        assert!(UdpConnector::new(Ipv4Addr::LOCALHOST, 0, 10).is_err());
        assert!(UdpConnector::new(Ipv4Addr::LOCALHOST, 60_000, 50_000).is_err());
        assert!(UdpConnector::new(Ipv4Addr::LOCALHOST, 50_000, 50_000).is_ok());
    }

    #[tokio::test]
    async fn test_connector_port_in_range_and_roundtrip() {
        let dest_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest_addr = match dest_sock.local_addr().unwrap() {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => unreachable!(),
        };

        let connector = UdpConnector::new(Ipv4Addr::LOCALHOST, 50_000, 60_000).unwrap();
        let link = connector
            .connect(ChannelId::new(7).unwrap(), Destination::from(dest_addr))
            .await
            .unwrap();

        let local = link.local_addr().unwrap();
        assert!((50_000..=60_000).contains(&local.port()));
        assert_eq!(connector.ports_in_use(), 1);

        link.send(b"request").await.unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = dest_sock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"request");
        assert_eq!(from, local);

        dest_sock.send_to(b"response", from).await.unwrap();
        assert_eq!(link.recv().await.unwrap(), b"response");

        drop(link);
        assert_eq!(connector.ports_in_use(), 0);
    }

    #[tokio::test]
    async fn test_connector_exhausts_single_port_range() {
        let dest: SocketAddrV4 = "127.0.0.1:9".parse().unwrap();
        let port = {
            let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        let connector = UdpConnector::new(Ipv4Addr::LOCALHOST, port, port).unwrap();
        let _first = connector
            .connect(ChannelId::new(1).unwrap(), Destination::from(dest))
            .await
            .unwrap();

        let second = connector
            .connect(ChannelId::new(2).unwrap(), Destination::from(dest))
            .await;
        assert!(matches!(
            second,
            Err(TransportError::PortRangeExhausted { .. })
        ));
    }
}
