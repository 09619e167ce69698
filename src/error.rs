//! Crate-wide error taxonomy.
//!
//! Decryption failures for individual envelopes during a multi-envelope scan
//! are swallowed by the caller (the envelope is skipped); failures at the
//! single-operation boundary surface through this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message exceeds the {0}-byte payload bound")]
    MessageTooLarge(usize),
    #[error("plaintext could not be encoded: {0}")]
    EncodingFailed(String),
    #[error("entropy source failed")]
    RandomGenerationFailed,
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("unsupported envelope version 0x{0:02x}")]
    UnsupportedVersion(u8),
    #[error("unsupported protocol byte 0x{0:02x}")]
    UnsupportedProtocol(u8),
    #[error("AEAD decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("no published key-agreement key found for {0}")]
    PublicKeyNotFound(String),
    #[error("no pre-shared key registered for {0}")]
    PskNotFound(String),
    #[error("ratchet counter was already accepted")]
    PskCounterReplay,
    #[error("ratchet counter outside the replay window")]
    PskCounterOutOfRange,
    #[error("indexer not configured")]
    IndexerNotConfigured,
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("chain error: {0}")]
    Chain(String),
}
