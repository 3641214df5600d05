//! Reliable peer-to-peer swap messaging core for a cross-chain
//! atomic-swap node.
//!
//! Provides durable, at-least-once message delivery between trading
//! peers over a direct stream transport with a sealed gossip fallback,
//! backed by a local queue store and driven by a backoff-retrying
//! delivery engine.

pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod resilience;
pub mod storage;
pub mod transport;

pub use config::{DeliveryConfig, NetworkNamespace};
pub use crypto::{EnvelopeCodec, Identity};
pub use delivery::DeliveryEngine;
pub use error::{Error, Result};
pub use protocol::{AckPayload, MessageKind, PeerId, ProtocolMessage, SealedEnvelope};
pub use storage::{InboxRow, OutboxRow, OutboxStatus, QueueStore};
