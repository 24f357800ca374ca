// ============================================
// File: crates/mixnet-transport/src/mock.rs
// ============================================
//! # Mock Destination Connector
//!
//! ## Creation Reason
//! Lets exit-side channel logic be tested without opening sockets or
//! depending on a live destination.
//!
//! ## Main Functionality
//! - `MockConnector`: hands out `MockLink`s, or refuses every connect
//! - `MockLink`: in-memory queues for injected responses and sent requests
//!
//! ## Usage in Tests
//! ```
//! use mixnet_common::{ChannelId, Destination};
//! use mixnet_transport::mock::MockConnector;
//! use mixnet_transport::traits::{DestinationConnector, DestinationLink};
//! use std::net::Ipv4Addr;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = MockConnector::new();
//! let id = ChannelId::new(1).unwrap();
//! let link = connector
//!     .connect(id, Destination::new(Ipv4Addr::LOCALHOST, 53))
//!     .await?;
//! link.send(b"query").await?;
//!
//! let mock = connector.link(id).unwrap();
//! assert_eq!(mock.take_sent(), vec![b"query".to_vec()]);
//! # Ok(())
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Queues are bounded to catch runaway loops in tests
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use mixnet_common::{ChannelId, Destination};

use crate::error::{Result, TransportError};
use crate::traits::{DestinationConnector, DestinationLink};

// ============================================
// Constants
// ============================================

/// Maximum number of messages to queue per direction.
const MAX_QUEUE_SIZE: usize = 1000;

// ============================================
// MockConnector
// ============================================

/// Mock destination connector for testing.
pub struct MockConnector {
    links: Mutex<HashMap<ChannelId, Arc<MockLink>>>,
    refuse: AtomicBool,
    next_port: AtomicU16,
    connects: Mutex<Vec<(ChannelId, Destination)>>,
}

impl MockConnector {
    /// Creates a connector whose connects succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            refuse: AtomicBool::new(false),
            next_port: AtomicU16::new(50_000),
            connects: Mutex::new(Vec::new()),
        }
    }

    /// Creates a connector whose connects fail as if refused.
    #[must_use]
    pub fn refusing() -> Self {
        let connector = Self::new();
        connector.set_refuse(true);
        connector
    }

    /// Switches between refusing and accepting connects.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    /// Returns the link opened for `channel_id`, if any.
    #[must_use]
    pub fn link(&self, channel_id: ChannelId) -> Option<Arc<MockLink>> {
        self.links.lock().get(&channel_id).cloned()
    }

    /// Returns every connect attempt so far, refused ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<(ChannelId, Destination)> {
        self.connects.lock().clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationConnector for MockConnector {
    async fn connect(
        &self,
        channel_id: ChannelId,
        destination: Destination,
    ) -> Result<Arc<dyn DestinationLink>> {
        self.connects.lock().push((channel_id, destination));

        if self.refuse.load(Ordering::Acquire) {
            return Err(TransportError::connect_failed(
                destination.socket_addr(),
                "connection refused",
            ));
        }

        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let link = Arc::new(MockLink::new(
            destination,
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
        ));
        self.links.lock().insert(channel_id, Arc::clone(&link));
        Ok(link)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("links", &self.links.lock().len())
            .field("refuse", &self.refuse.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================
// MockLink
// ============================================

/// In-memory destination link.
pub struct MockLink {
    destination: Destination,
    local_addr: SocketAddr,
    /// Responses waiting to be returned by `recv()`
    inbound: Mutex<VecDeque<Vec<u8>>>,
    /// Requests that have been sent (captured for verification)
    sent: Mutex<VecDeque<Vec<u8>>>,
    closed: AtomicBool,
    notify: Notify,
}

impl MockLink {
    fn new(destination: Destination, local_addr: SocketAddr) -> Self {
        Self {
            destination,
            local_addr,
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Destination this link was opened for.
    #[must_use]
    pub const fn destination(&self) -> Destination {
        self.destination
    }

    /// Queues a response to be returned by the next `recv()`.
    ///
    /// # Panics
    /// Panics if the queue is full.
    pub fn inject_response(&self, message: Vec<u8>) {
        let mut queue = self.inbound.lock();
        assert!(queue.len() < MAX_QUEUE_SIZE, "mock link inbound overflow");
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    /// Takes every message sent so far.
    #[must_use]
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().drain(..).collect()
    }

    /// Returns `true` once `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DestinationLink for MockLink {
    async fn send(&self, message: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut queue = self.sent.lock();
        if queue.len() >= MAX_QUEUE_SIZE {
            return Err(TransportError::SendFailed {
                dest: self.destination.socket_addr(),
                reason: "mock send queue full".into(),
            });
        }
        queue.push_back(message.to_vec());
        Ok(message.len())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            {
                if let Some(message) = self.inbound.lock().pop_front() {
                    return Ok(message);
                }
            }
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            notified.await;
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("destination", &self.destination)
            .field("pending_responses", &self.inbound.lock().len())
            .field("sent", &self.sent.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
