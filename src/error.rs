use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the envelope codec, key resolution and rekey copies.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Key not found: {name} in vault {vault}")]
    KeyNotFound { vault: String, name: String },

    #[error("Crypto operation failed: {0}")]
    CryptoOperationFailed(String),

    #[error("Unsupported encryption protocol: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Signed reference expired at {expired_at}")]
    CopyExpired { expired_at: DateTime<Utc> },

    #[error("Copy {copy_id} did not complete within {timeout_ms} ms")]
    CopyTimeout { copy_id: String, timeout_ms: u128 },

    #[error("Copy {copy_id} failed: {reason}")]
    CopyFailed { copy_id: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Blob {0} carries no encryption metadata")]
    MissingEncryptionData(String),

    #[error("Invalid encryption metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid key identifier: {0}")]
    InvalidKeyIdentifier(String),

    #[error("Invalid vault or key name: {0:?}")]
    InvalidName(String),

    #[error("Content of {location} differs from the original after the round trip")]
    IntegrityMismatch { location: String },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

impl From<StorageError> for EnvelopeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ReferenceExpired { expired_at } => EnvelopeError::CopyExpired { expired_at },
            other => EnvelopeError::Storage(other),
        }
    }
}

impl From<KmsError> for EnvelopeError {
    fn from(err: KmsError) -> Self {
        match err {
            KmsError::NotFound { vault, name } => EnvelopeError::KeyNotFound { vault, name },
            KmsError::Rejected(reason) => EnvelopeError::DecryptionFailed(reason),
            KmsError::Operation(reason) | KmsError::Transport(reason) => {
                EnvelopeError::CryptoOperationFailed(reason)
            }
        }
    }
}

/// Errors reported by a key-management service.
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("Key {name} not found in vault {vault}")]
    NotFound { vault: String, name: String },

    #[error("Unwrap rejected: {0}")]
    Rejected(String),

    #[error("Key operation failed: {0}")]
    Operation(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors reported by a blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Storage account not found: {0}")]
    AccountNotFound(String),

    #[error("Cannot copy from {source_account} into {destination_account} by direct reference")]
    CrossAccountReference {
        source_account: String,
        destination_account: String,
    },

    #[error("Location in account {got} is not served by account {expected}")]
    WrongAccount { expected: String, got: String },

    #[error("Signed reference signature is invalid")]
    InvalidSignature,

    #[error("Signed reference expired at {expired_at}")]
    ReferenceExpired { expired_at: DateTime<Utc> },

    #[error("Signed reference lifetime out of range: {ttl_ms} ms")]
    InvalidTtl { ttl_ms: u128 },

    #[error("Copy not found: {0}")]
    CopyNotFound(String),

    #[error("Body stream failed: {0}")]
    Body(#[from] std::io::Error),
}
