//! Wire-level constants for the swap messaging protocol.

/// Maximum size of a single framed stream message, in bytes.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length of the big-endian frame length prefix, in bytes.
pub const FRAME_LENGTH_PREFIX_SIZE: usize = 4;

/// Length of an X25519 ephemeral public key, in bytes.
pub const EPHEMERAL_KEY_SIZE: usize = 32;

/// Length of the random nonce used by the sealed envelope, in bytes.
pub const ENVELOPE_NONCE_SIZE: usize = 24;
