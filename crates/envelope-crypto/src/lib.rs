//! Cryptographic primitives for client-side envelope encryption.
//!
//! - Per-object DEK and base nonce generation
//! - Region-chunked AES-256-GCM for streaming payloads
//! - ECDH-ES+A256KW wrapping of DEKs under P-256 master keys

pub mod dek;
pub mod error;
pub mod key_wrap;
pub mod region;
pub mod types;

pub use dek::{generate_dek, generate_iv, ContentKey};
pub use error::CryptoError;
pub use key_wrap::{generate_master_key, unwrap_key, wrap_key, ECDH_ES_A256KW};
pub use p256::{PublicKey, SecretKey};
pub use region::{sealed_length, RegionCipher};
pub use types::{
    AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, DEFAULT_REGION_LENGTH,
    MAX_REGION_LENGTH, WRAPPED_KEY_LENGTH,
};
