// ============================================
// File: crates/mixnet-transport/src/terminal.rs
// ============================================
//! # Terminal Stream Connector
//!
//! ## Creation Reason
//! The terminal hop ("last mix") does not talk to arbitrary destinations.
//! It bridges every channel to one fixed local stream endpoint, which
//! forwards traffic onward on its own.
//!
//! ## Main Functionality
//! - `TerminalConnector`: one TCP stream per channel to the fixed endpoint
//! - `TerminalLink`: length-prefixed message framing over that stream
//!
//! ## Wire Format
//! ```text
//! Connect record (once, right after the TCP connect):
//! ┌─────────┬─────────┬───────────┬────────┬───────────┬──────────┐
//! │ 0x01    │ 0x04    │ 0x01      │ IPv4   │ dest port │ src port │
//! │ version │ command │ addr type │ 4 B    │ 2 B BE    │ 2 B BE   │
//! └─────────┴─────────┴───────────┴────────┴───────────┴──────────┘
//!
//! Every message afterwards, both directions:
//! ┌──────────────┬──────────────────┐
//! │ len (2 B BE) │ payload (len B)  │
//! └──────────────┴──────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The endpoint sends no reply to the connect record
//! - The src port field carries the channel id so the endpoint can tell
//!   channels apart
//!
//! ## Last Modified
//! v0.1.0 - Initial terminal connector

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use mixnet_common::{ChannelId, Destination, DESTINATION_LEN};

use crate::error::{Result, TransportError};
use crate::traits::{DestinationConnector, DestinationLink};

// ============================================
// Constants
// ============================================

/// Protocol version byte of the connect record.
pub const HANDSHAKE_VERSION: u8 = 0x01;

/// Command byte of the connect record.
pub const HANDSHAKE_COMMAND: u8 = 0x04;

/// Address type byte for IPv4.
pub const ADDR_TYPE_IPV4: u8 = 0x01;

/// Length of the connect record.
pub const HANDSHAKE_LEN: usize = 3 + DESTINATION_LEN + 2;

/// Length of the message length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Builds the connect record for `destination` on behalf of `channel_id`.
#[must_use]
pub fn connect_record(channel_id: ChannelId, destination: &Destination) -> [u8; HANDSHAKE_LEN] {
    let mut record = [0u8; HANDSHAKE_LEN];
    record[0] = HANDSHAKE_VERSION;
    record[1] = HANDSHAKE_COMMAND;
    record[2] = ADDR_TYPE_IPV4;
    record[3..3 + DESTINATION_LEN].copy_from_slice(&destination.to_bytes());
    record[3 + DESTINATION_LEN..].copy_from_slice(&channel_id.to_bytes());
    record
}

// ============================================
// TerminalConnector
// ============================================

/// Connects channels to the fixed local stream endpoint.
#[derive(Debug, Clone)]
pub struct TerminalConnector {
    endpoint: SocketAddr,
}

impl TerminalConnector {
    /// Creates a connector for `endpoint`.
    #[must_use]
    pub const fn new(endpoint: SocketAddr) -> Self {
        Self { endpoint }
    }

    /// Returns the stream endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }
}

#[async_trait]
impl DestinationConnector for TerminalConnector {
    async fn connect(
        &self,
        channel_id: ChannelId,
        destination: Destination,
    ) -> Result<Arc<dyn DestinationLink>> {
        let mut stream = TcpStream::connect(self.endpoint)
            .await
            .map_err(|e| TransportError::connect_failed(self.endpoint, e.to_string()))?;

        stream
            .write_all(&connect_record(channel_id, &destination))
            .await
            .map_err(|e| TransportError::handshake_failed(e.to_string()))?;

        let local_addr = stream
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        debug!(
            channel_id = %channel_id,
            destination = %destination,
            endpoint = %self.endpoint,
            "Terminal stream established"
        );

        let (reader, writer) = stream.into_split();
        Ok(Arc::new(TerminalLink {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            local_addr,
        }))
    }

    fn name(&self) -> &'static str {
        "terminal"
    }
}

// ============================================
// TerminalLink
// ============================================

/// One channel's framed stream to the terminal endpoint.
#[derive(Debug)]
pub struct TerminalLink {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    local_addr: SocketAddr,
}

#[async_trait]
impl DestinationLink for TerminalLink {
    async fn send(&self, message: &[u8]) -> Result<usize> {
        let len = u16::try_from(message.len()).map_err(|_| {
            TransportError::invalid_config("message", "longer than a 16-bit length prefix")
        })?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + message.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(message);

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::io("writing terminal frame", e))?;
        Ok(message.len())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        if let Err(e) = reader.read_exact(&mut prefix).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::io("reading terminal frame length", e)
            });
        }

        let mut message = vec![0u8; usize::from(u16::from_be_bytes(prefix))];
        reader.read_exact(&mut message).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::io("reading terminal frame", e)
            }
        })?;
        Ok(message)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[test]
    fn test_connect_record_layout() {
        let dest = Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456);
        let record = connect_record(ChannelId::new(0x0102).unwrap(), &dest);
        assert_eq!(
            record,
            [0x01, 0x04, 0x01, 127, 0, 0, 2, 0x5B, 0xA0, 0x01, 0x02]
        );
    }

    #[tokio::test]
    async fn test_handshake_and_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        let dest = Destination::new(Ipv4Addr::new(10, 0, 0, 1), 80);

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut record = [0u8; HANDSHAKE_LEN];
            sock.read_exact(&mut record).await.unwrap();

            let mut len = [0u8; 2];
            sock.read_exact(&mut len).await.unwrap();
            let mut body = vec![0u8; usize::from(u16::from_be_bytes(len))];
            sock.read_exact(&mut body).await.unwrap();

            // Echo, framed.
            sock.write_all(&len).await.unwrap();
            sock.write_all(&body).await.unwrap();
            (record, body)
        });

        let connector = TerminalConnector::new(endpoint);
        let link = connector
            .connect(ChannelId::new(9).unwrap(), dest)
            .await
            .unwrap();
        link.send(b"hello terminal").await.unwrap();
        assert_eq!(link.recv().await.unwrap(), b"hello terminal");

        let (record, body) = server.await.unwrap();
        assert_eq!(record, connect_record(ChannelId::new(9).unwrap(), &dest));
        assert_eq!(body, b"hello terminal");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let endpoint = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap()
        };
        let connector = TerminalConnector::new(endpoint);
        let result = connector
            .connect(
                ChannelId::new(1).unwrap(),
                Destination::new(Ipv4Addr::LOCALHOST, 1),
            )
            .await;
        match result {
            Err(e) => assert!(e.is_channel_fatal()),
            Ok(_) => panic!("connect to a closed port succeeded"),
        }
    }

    #[tokio::test]
    async fn test_recv_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut record = [0u8; HANDSHAKE_LEN];
            sock.read_exact(&mut record).await.unwrap();
        });

        let link = TerminalConnector::new(endpoint)
            .connect(
                ChannelId::new(3).unwrap(),
                Destination::new(Ipv4Addr::LOCALHOST, 53),
            )
            .await
            .unwrap();
        server.await.unwrap();
        assert!(matches!(link.recv().await, Err(TransportError::Closed)));
    }
}
