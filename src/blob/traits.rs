//! Blob storage interface.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::error::StorageError;
use crate::types::{BlobLocation, BlobMetadata};

/// Streaming blob content.
pub type BlobBody = Box<dyn AsyncRead + Send + Unpin>;

/// A time-bounded, read-scoped capability for one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReference {
    pub location: BlobLocation,
    pub expires_at: DateTime<Utc>,
    /// Hex HMAC over the location and expiry, keyed by the source account.
    pub signature: String,
}

impl SignedReference {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// URI form, as handed to a remote copy.
    pub fn uri(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}?sp=r&se={}&sig={}",
            self.location.account,
            self.location.container,
            self.location.name,
            self.expires_at.to_rfc3339(),
            self.signature
        )
    }
}

/// Input of a server-side copy.
#[derive(Debug, Clone)]
pub enum CopySource {
    /// A blob in the same account as the destination.
    Internal(BlobLocation),
    /// A blob in any account, reachable through a signed reference.
    Signed(SignedReference),
}

impl CopySource {
    pub fn location(&self) -> &BlobLocation {
        match self {
            CopySource::Internal(location) => location,
            CopySource::Signed(reference) => &reference.location,
        }
    }
}

/// Handle of an accepted copy, used to poll its status.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CopyHandle {
    pub copy_id: String,
    pub destination: BlobLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed(String),
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyStatus::Pending => f.write_str("pending"),
            CopyStatus::Success => f.write_str("success"),
            CopyStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One storage account's blob service.
///
/// `put` must commit body and metadata together: a body stream that fails
/// part-way leaves no blob behind.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Name of the storage account this store writes to.
    fn account(&self) -> &str;

    async fn put(
        &self,
        location: &BlobLocation,
        body: BlobBody,
        metadata: BlobMetadata,
    ) -> Result<(), StorageError>;

    async fn get(&self, location: &BlobLocation) -> Result<(BlobBody, BlobMetadata), StorageError>;

    async fn get_properties(&self, location: &BlobLocation) -> Result<BlobMetadata, StorageError>;

    /// Start a server-side copy into `destination` with `metadata` attached.
    /// Returns once the copy is accepted, not once it is complete.
    async fn copy_from_reference(
        &self,
        source: CopySource,
        destination: &BlobLocation,
        metadata: BlobMetadata,
    ) -> Result<CopyHandle, StorageError>;

    async fn copy_status(&self, handle: &CopyHandle) -> Result<CopyStatus, StorageError>;

    async fn mint_signed_read_reference(
        &self,
        location: &BlobLocation,
        ttl: Duration,
    ) -> Result<SignedReference, StorageError>;
}
