//! Abstract peer transport.
//!
//! The connection substrate (QUIC, local discovery, DHT, pub/sub
//! routing, relays) lives outside this crate; the protocol only needs
//! the operations below. Fan-out of a published channel message to its
//! members is the transport's responsibility.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use pv_proto::types::ChannelId;

use crate::error::TransportError;

/// Opaque address of a discoverable peer (multiaddr, host:port, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr(pub String);

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound frame callback: (connection, raw bytes).
pub type InboundCallback = Arc<dyn Fn(SessionHandle, Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Open a connection to a peer address.
    async fn connect(&self, addr: &PeerAddr) -> Result<SessionHandle, TransportError>;

    /// Send one frame on an open connection.
    async fn send(&self, handle: SessionHandle, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Register the single inbound frame callback.
    fn on_receive(&self, callback: InboundCallback);

    /// Lazy, unbounded, restartable stream of discovered peer addresses.
    fn discover_peers(&self) -> mpsc::Receiver<PeerAddr>;

    /// Whether the connection runs through a relay rather than directly.
    fn is_relayed(&self, handle: SessionHandle) -> bool;

    /// Publish a channel frame for delivery to all members of the
    /// channel's topic. Routing and fan-out happen inside the transport.
    async fn publish(&self, channel: &ChannelId, frame: Vec<u8>) -> Result<(), TransportError>;
}
