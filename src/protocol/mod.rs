//! Wire types for the swap messaging protocol: peer identity, the closed
//! message-kind enumeration, the Protocol Message, the Sealed Envelope,
//! and ACK payload, plus the framing constants transports build on.

pub mod constants;
pub mod types;

pub use constants::{
    ENVELOPE_NONCE_SIZE, EPHEMERAL_KEY_SIZE, FRAME_LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE,
};
pub use types::{AckPayload, MessageKind, PeerId, ProtocolMessage, SealedEnvelope};
