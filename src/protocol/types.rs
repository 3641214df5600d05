//! Core wire types: peer identity, the closed message-kind enumeration,
//! the Protocol Message, the Sealed Envelope, and the ACK payload.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Base64 (standard, padded) codec used for every binary field in the
/// canonical JSON wire form, matching the convention named in the
/// external interfaces.
mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A peer's stable identifier: the raw bytes of its Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_hex())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("peer id must be 32 bytes"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(PeerId(arr))
    }
}

/// The closed set of wire message kinds. Serialized as the exact
/// lower-snake-case strings named in the external interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    OrderAnnounce,
    OrderCancel,
    OrderTake,
    OrderTaken,
    SwapInit,
    SwapAccept,
    PubkeyExchange,
    NonceExchange,
    FundingInfo,
    PartialSig,
    Complete,
    Refund,
    Abort,
    HtlcSecretHash,
    HtlcSecretReveal,
    HtlcClaim,
    EvmFundingInfo,
    EvmClaimed,
    EvmRefunded,
    Ack,
}

/// A protocol message exchanged between two swap peers.
///
/// Within one trade, a sender's `sequence_num` values are strictly
/// monotonic and gap-free starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    pub trade_id: String,
    pub order_id: Option<String>,
    pub sender_id: PeerId,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub message_id: Option<Uuid>,
    pub sequence_num: Option<u64>,
    pub requires_ack: bool,
    pub swap_expiry: u64,
}

impl ProtocolMessage {
    /// Serialize to the canonical JSON wire form.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the canonical JSON wire form back into a message.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }
}

/// The inner payload of an ACK message, itself carried as the `payload`
/// of a `ProtocolMessage` with `kind = Ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub message_id: Uuid,
    pub sequence_num: Option<u64>,
    pub success: bool,
    pub error: String,
}

impl AckPayload {
    pub fn success(message_id: Uuid, sequence_num: Option<u64>) -> Self {
        Self {
            message_id,
            sequence_num,
            success: true,
            error: String::new(),
        }
    }

    pub fn failure(message_id: Uuid, sequence_num: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            message_id,
            sequence_num,
            success: false,
            error: error.into(),
        }
    }
}

/// The wire form of a sealed, broadcast-capable message: an authenticated,
/// forward-secret container addressed to exactly one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub recipient_id: PeerId,
    pub sender_id: PeerId,
    #[serde(with = "b64")]
    pub ephemeral_key: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    pub message_id: Uuid,
    pub trade_id: String,
}

impl SealedEnvelope {
    /// O(1) routing check performed before any cryptographic work.
    pub fn is_for_us(&self, local_id: &PeerId) -> bool {
        &self.recipient_id == local_id
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }
}
