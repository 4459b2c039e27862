//! Client-side envelope encryption for blob storage.
//!
//! Objects are encrypted with a fresh DEK, the DEK is wrapped by a master key
//! held in a key vault, and the wrapped key travels with the object as its
//! `encryptiondata` metadata entry. Copies can be rekeyed to another vault
//! without touching the ciphertext.

pub mod blob;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod kms;
pub mod metadata;
pub mod provider;
pub mod rekey;
pub mod resolver;
pub mod scenario;
pub mod types;

pub use blob::{
    BlobBody, BlobStore, CopyHandle, CopySource, CopyStatus, InMemoryBlobService,
    InMemoryBlobStore, SignedReference,
};
pub use client::EncryptedBlobClient;
pub use codec::{CodecOptions, EnvelopeCodec};
pub use config::Settings;
pub use error::{EnvelopeError, KmsError, Result, StorageError};
pub use kms::{InMemoryKms, KeyHandle, KeyManagementService};
pub use metadata::{EncryptionMetadata, ENCRYPTION_DATA_KEY};
pub use provider::MasterKeyProvider;
pub use rekey::{CopyOptions, RekeyCopier};
pub use resolver::{KeyResolver, ResolveStrategy};
pub use scenario::{RotationScenario, ScenarioReport};
pub use types::{
    cancellation, never_cancelled, BlobLocation, BlobMetadata, CancelSignal, KeyIdentifier,
    KeySpec, VaultIdentity, WrapAlgorithm,
};
