// ============================================
// File: crates/mixnet-node/src/services/destination.rs
// ============================================
//! # Destination I/O
//!
//! ## Creation Reason
//! The exit driver owns its channel table and must never wait on a
//! destination. Connects and destination traffic therefore run in small
//! helper tasks that report back through one event inbox.
//!
//! ## Main Functionality
//! - `connect_destination`: one connect attempt, turned into an event
//! - `spawn_connect`: the same, on its own task
//! - `DestinationHandle`: reader and writer tasks around one open link
//!
//! ## Task Layout
//! ```text
//!                 ┌──────────── events (mpsc) ◄─────────────┐
//!                 ▼                                          │
//!   ┌──────────────────────┐  outgoing (mpsc)  ┌──────────┐ │ ┌──────────┐
//!   │ exit driver (select!)│ ────────────────► │  writer  │ │ │  reader  │
//!   └──────────────────────┘                   └────┬─────┘ │ └────┬─────┘
//!                                                   ▼       │      │
//!                                            DestinationLink ◄─────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Reader and writer are separate tasks; a stream link's `recv` is not
//!   cancel-safe, so it must never sit in a `select!` next to a send
//! - The outgoing queue is bounded; a full queue drops the message
//!
//! ## Last Modified
//! v0.1.0 - Initial destination tasks

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use mixnet_common::{ChannelId, Destination};
use mixnet_transport::{DestinationConnector, DestinationLink, TransportError};

/// Per-link outgoing queue depth.
pub const OUTGOING_QUEUE: usize = 64;

// ============================================
// DestinationEvent
// ============================================

/// Something that happened on the destination side of a channel.
pub enum DestinationEvent {
    /// The link is up.
    Connected {
        channel_id: ChannelId,
        link: Arc<dyn DestinationLink>,
    },
    /// The destination could not be reached.
    ConnectFailed {
        channel_id: ChannelId,
        error: TransportError,
    },
    /// One message from the destination.
    Response {
        channel_id: ChannelId,
        payload: Vec<u8>,
    },
    /// The link went away.
    Closed { channel_id: ChannelId },
}

impl DestinationEvent {
    #[must_use]
    pub const fn channel_id(&self) -> ChannelId {
        match self {
            Self::Connected { channel_id, .. }
            | Self::ConnectFailed { channel_id, .. }
            | Self::Response { channel_id, .. }
            | Self::Closed { channel_id } => *channel_id,
        }
    }
}

impl std::fmt::Debug for DestinationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected { channel_id, .. } => {
                f.debug_struct("Connected").field("channel_id", channel_id).finish()
            }
            Self::ConnectFailed { channel_id, error } => f
                .debug_struct("ConnectFailed")
                .field("channel_id", channel_id)
                .field("error", error)
                .finish(),
            Self::Response {
                channel_id,
                payload,
            } => f
                .debug_struct("Response")
                .field("channel_id", channel_id)
                .field("len", &payload.len())
                .finish(),
            Self::Closed { channel_id } => {
                f.debug_struct("Closed").field("channel_id", channel_id).finish()
            }
        }
    }
}

// ============================================
// Connect
// ============================================

/// Runs one connect attempt for `channel_id`.
pub async fn connect_destination(
    connector: Arc<dyn DestinationConnector>,
    channel_id: ChannelId,
    destination: Destination,
) -> DestinationEvent {
    match connector.connect(channel_id, destination).await {
        Ok(link) => {
            debug!(
                channel_id = %channel_id,
                destination = %destination,
                connector = connector.name(),
                "Destination connected"
            );
            DestinationEvent::Connected { channel_id, link }
        }
        Err(error) => {
            debug!(
                channel_id = %channel_id,
                destination = %destination,
                error = %error,
                "Destination connect failed"
            );
            DestinationEvent::ConnectFailed { channel_id, error }
        }
    }
}

/// Runs `connect_destination` on its own task and posts the outcome.
pub fn spawn_connect(
    connector: Arc<dyn DestinationConnector>,
    channel_id: ChannelId,
    destination: Destination,
    events: mpsc::Sender<DestinationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = connect_destination(connector, channel_id, destination).await;
        if events.send(event).await.is_err() {
            trace!(channel_id = %channel_id, "Driver gone before connect finished");
        }
    })
}

// ============================================
// DestinationHandle
// ============================================

/// Running I/O tasks of one open destination link.
pub struct DestinationHandle {
    channel_id: ChannelId,
    outgoing: mpsc::Sender<Vec<u8>>,
    link: Arc<dyn DestinationLink>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl DestinationHandle {
    /// Starts the reader and writer tasks for `link`.
    ///
    /// Messages read from the link arrive on `events` as `Response`; a
    /// failing read posts `Closed` and ends the reader.
    pub fn spawn(
        channel_id: ChannelId,
        link: Arc<dyn DestinationLink>,
        events: mpsc::Sender<DestinationEvent>,
    ) -> Self {
        let reader = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                loop {
                    match link.recv().await {
                        Ok(payload) => {
                            let event = DestinationEvent::Response {
                                channel_id,
                                payload,
                            };
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(channel_id = %channel_id, error = %e, "Destination read ended");
                            let _ = events.send(DestinationEvent::Closed { channel_id }).await;
                            break;
                        }
                    }
                }
            })
        };

        let (outgoing, mut queue) = mpsc::channel::<Vec<u8>>(OUTGOING_QUEUE);
        let writer = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                while let Some(message) = queue.recv().await {
                    if let Err(e) = link.send(&message).await {
                        debug!(channel_id = %channel_id, error = %e, "Destination send failed");
                    }
                }
            })
        };

        Self {
            channel_id,
            outgoing,
            link,
            reader,
            writer,
        }
    }

    /// Queues one complete request for the destination.
    ///
    /// Returns `false` if the message was dropped.
    pub fn send(&self, message: Vec<u8>) -> bool {
        match self.outgoing.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(channel_id = %self.channel_id, error = %e, "Destination queue rejected message");
                false
            }
        }
    }

    /// Stops the reader, lets the writer drain, and closes the link.
    pub async fn close(self) {
        let Self {
            channel_id,
            outgoing,
            link,
            reader,
            writer,
        } = self;

        reader.abort();
        drop(outgoing);
        if writer.await.is_err() {
            debug!(channel_id = %channel_id, "Destination writer panicked");
        }
        link.close().await;
        trace!(channel_id = %channel_id, "Destination link closed");
    }
}

impl std::fmt::Debug for DestinationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationHandle")
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use std::time::Duration;

    use mixnet_transport::MockConnector;

    fn dest() -> Destination {
        Destination::new(Ipv4Addr::new(127, 0, 0, 2), 23456)
    }

    fn id() -> ChannelId {
        ChannelId::new(12).unwrap()
    }

    async fn next_event(events: &mut mpsc::Receiver<DestinationEvent>) -> DestinationEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_posts_connected() {
        let connector: Arc<dyn DestinationConnector> = Arc::new(MockConnector::new());
        let (tx, mut rx) = mpsc::channel(8);

        spawn_connect(connector, id(), dest(), tx);
        let event = next_event(&mut rx).await;
        assert!(matches!(event, DestinationEvent::Connected { .. }));
        assert_eq!(event.channel_id(), id());
    }

    #[tokio::test]
    async fn test_handle_round_trip_and_close() {
        let mock = Arc::new(MockConnector::new());
        let connector: Arc<dyn DestinationConnector> = mock.clone();
        let (tx, mut rx) = mpsc::channel(8);

        let link = match connect_destination(connector, id(), dest()).await {
            DestinationEvent::Connected { link, .. } => link,
            other => panic!("expected connect, got {other:?}"),
        };
        let handle = DestinationHandle::spawn(id(), link, tx);
        let mock_link = mock.link(id()).unwrap();

        assert!(handle.send(b"first".to_vec()));
        assert!(handle.send(b"second".to_vec()));

        mock_link.inject_response(b"answer".to_vec());
        match next_event(&mut rx).await {
            DestinationEvent::Response { payload, .. } => assert_eq!(payload, b"answer"),
            other => panic!("expected response, got {other:?}"),
        }

        handle.close().await;
        assert!(mock_link.is_closed());
        assert_eq!(
            mock_link.take_sent(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_closed_link_posts_closed() {
        let mock = Arc::new(MockConnector::new());
        let connector: Arc<dyn DestinationConnector> = mock.clone();
        let (tx, mut rx) = mpsc::channel(8);

        let link = match connect_destination(connector, id(), dest()).await {
            DestinationEvent::Connected { link, .. } => link,
            other => panic!("expected connect, got {other:?}"),
        };
        let _handle = DestinationHandle::spawn(id(), Arc::clone(&link), tx);

        link.close().await;
        assert!(matches!(
            next_event(&mut rx).await,
            DestinationEvent::Closed { .. }
        ));
    }
}
