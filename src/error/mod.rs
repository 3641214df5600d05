//! Error types for the swap messaging core.

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Abstract error taxonomy for the messaging core.
///
/// Variants map onto the categories consumers are expected to match on:
/// `Transient` errors are retried by the Delivery Engine, `Malformed` and
/// `CryptoFailed` are dropped at the point of receipt, `NotForUs` is a
/// cheap routing filter, `Rejected` surfaces a peer's negative ACK to the
/// application via the outbox row's `error_reason`. `Expired` and
/// `Exhausted` outcomes (spec §7) are terminal `OutboxStatus` transitions
/// rather than `Error` values — the Delivery Engine marks a row `expired`
/// or `failed` directly instead of raising and matching on an error for
/// what is already a durable, inspectable row state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("truncated frame")]
    Truncated,

    #[error("authenticated decryption failed")]
    CryptoFailed,

    #[error("envelope not addressed to local identity")]
    NotForUs,

    #[error("peer rejected message: {0}")]
    Rejected(String),

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}
