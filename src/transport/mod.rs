//! Direct and fallback delivery paths between peers: a framed
//! request/ACK stream for the common case, and sealed gossip publish for
//! when a direct connection cannot be established.

pub mod broadcast;
pub mod framing;
pub mod stream;
pub mod traits;

pub use broadcast::BroadcastTransport;
pub use framing::{read_frame, write_frame};
pub use stream::StreamTransport;
pub use traits::{
    BidirectionalStream, Broadcast, ByteStream, ConnectednessEvents, ConnectednessState,
    Connector, InboundStreamHandler, MessageHandler, PeerDirectory, StreamOpener,
};
