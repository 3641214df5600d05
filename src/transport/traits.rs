//! External collaborator contracts the core consumes. The peer-to-peer
//! network library (connection management, DHT lookup, pub/sub gossip,
//! stream multiplexing) implements these; this crate only calls them.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::PeerId;

/// A duplex byte stream opened to a single peer under a protocol id.
pub trait BidirectionalStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> BidirectionalStream for T {}

pub type ByteStream = std::pin::Pin<Box<dyn BidirectionalStream>>;

/// Resolves a peer id to connection addresses.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn find_peer(&self, peer_id: PeerId, timeout: Duration) -> Result<Vec<String>>;
}

/// Reports and establishes direct connectivity to peers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn is_connected(&self, peer_id: PeerId) -> bool;
    async fn connect(&self, addresses: &[String], timeout: Duration) -> Result<()>;
}

/// Invoked once per inbound stream opened under a registered protocol id.
#[async_trait]
pub trait InboundStreamHandler: Send + Sync {
    async fn handle_stream(&self, peer_id: PeerId, stream: ByteStream);
}

/// Opens outbound streams and registers the inbound stream handler.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open_stream(&self, peer_id: PeerId, protocol_id: &str) -> Result<ByteStream>;
    async fn set_stream_handler(
        &self,
        protocol_id: &str,
        handler: std::sync::Arc<dyn InboundStreamHandler>,
    );
}

/// Fan-out publish/subscribe used as a delivery fallback.
#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>>;
}

/// Connectedness transition reported by the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectednessState {
    Connected,
    NotConnected,
}

/// A stream of per-peer connectedness transitions.
#[async_trait]
pub trait ConnectednessEvents: Send + Sync {
    async fn subscribe(&self) -> mpsc::Receiver<(PeerId, ConnectednessState)>;
}

/// Invoked once per newly-dispatched, deduplicated inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: crate::protocol::ProtocolMessage) -> Result<()>;
}
