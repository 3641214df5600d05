//! Cryptographic identity and the Envelope Codec.

pub mod envelope;
pub mod identity;

pub use envelope::EnvelopeCodec;
pub use identity::{peer_id_to_montgomery, Identity};
