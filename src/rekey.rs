//! RekeyCopier: server-side copies that can point an object at another vault.
//!
//! The ciphertext is never read or rewritten by the client. A rekey only
//! changes the vault component of the key identifier inside the copied
//! `encryptiondata` entry; the wrapped DEK and IV are carried over as-is, so
//! the target vault must hold the same key material under the same name.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::blob::{BlobStore, CopyHandle, CopySource, CopyStatus, SignedReference};
use crate::error::{EnvelopeError, Result};
use crate::metadata::EncryptionMetadata;
use crate::types::{check_cancelled, BlobLocation, BlobMetadata, CancelSignal, VaultIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Lifetime of signed references minted for cross-account copies.
    pub signed_reference_ttl: Duration,
    /// Delay between copy status checks.
    pub poll_interval: Duration,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            signed_reference_ttl: Duration::from_secs(120),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Issues copies out of a source account, either within it or into a
/// destination account.
#[derive(Clone)]
pub struct RekeyCopier {
    source: Arc<dyn BlobStore>,
    destination: Arc<dyn BlobStore>,
    options: CopyOptions,
}

impl RekeyCopier {
    pub fn new(
        source: Arc<dyn BlobStore>,
        destination: Arc<dyn BlobStore>,
        options: CopyOptions,
    ) -> Self {
        Self {
            source,
            destination,
            options,
        }
    }

    /// Copier whose source and destination are the same account.
    pub fn within(store: Arc<dyn BlobStore>, options: CopyOptions) -> Self {
        Self::new(Arc::clone(&store), store, options)
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Copy inside the source account, metadata verbatim.
    pub async fn copy_same_account(
        &self,
        source: &BlobLocation,
        destination: &BlobLocation,
    ) -> Result<CopyHandle> {
        let metadata = self.source.get_properties(source).await?;
        let handle = self
            .source
            .copy_from_reference(CopySource::Internal(source.clone()), destination, metadata)
            .await?;
        info!(copy_id = %handle.copy_id, %source, %destination, "copy started");
        Ok(handle)
    }

    /// Copy inside the source account, pointing the copy at `new_vault`.
    pub async fn copy_with_rekey(
        &self,
        source: &BlobLocation,
        destination: &BlobLocation,
        new_vault: &VaultIdentity,
    ) -> Result<CopyHandle> {
        let metadata = self.rekeyed_properties(source, new_vault).await?;
        let handle = self
            .source
            .copy_from_reference(CopySource::Internal(source.clone()), destination, metadata)
            .await?;
        info!(
            copy_id = %handle.copy_id,
            %source,
            %destination,
            vault = %new_vault,
            "rekey copy started"
        );
        Ok(handle)
    }

    /// Copy into the destination account through a freshly minted signed
    /// reference, pointing the copy at `new_vault`.
    pub async fn copy_cross_account(
        &self,
        source: &BlobLocation,
        destination: &BlobLocation,
        new_vault: &VaultIdentity,
    ) -> Result<CopyHandle> {
        let reference = self
            .source
            .mint_signed_read_reference(source, self.options.signed_reference_ttl)
            .await?;
        debug!(%source, expires_at = %reference.expires_at, "minted signed reference");
        self.copy_cross_account_with_reference(reference, destination, new_vault)
            .await
    }

    /// Copy into the destination account through `reference`.
    ///
    /// An expired reference fails with `CopyExpired` before any copy is issued.
    pub async fn copy_cross_account_with_reference(
        &self,
        reference: SignedReference,
        destination: &BlobLocation,
        new_vault: &VaultIdentity,
    ) -> Result<CopyHandle> {
        if reference.is_expired() {
            return Err(EnvelopeError::CopyExpired {
                expired_at: reference.expires_at,
            });
        }
        let source = reference.location.clone();
        let metadata = self.rekeyed_properties(&source, new_vault).await?;
        let handle = self
            .destination
            .copy_from_reference(CopySource::Signed(reference), destination, metadata)
            .await?;
        info!(
            copy_id = %handle.copy_id,
            %source,
            %destination,
            vault = %new_vault,
            "cross-account rekey copy started"
        );
        Ok(handle)
    }

    /// Poll a copy until it succeeds, fails, times out or is cancelled.
    pub async fn wait_for_copy_completion(
        &self,
        handle: &CopyHandle,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let store = if handle.destination.account == self.destination.account() {
            &self.destination
        } else {
            &self.source
        };
        let poll = poll_copy(store.as_ref(), handle, self.options.poll_interval, cancel.clone());

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(())) => {
                debug!(copy_id = %handle.copy_id, destination = %handle.destination, "copy completed");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EnvelopeError::CopyTimeout {
                copy_id: handle.copy_id.clone(),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    /// Source properties with the `encryptiondata` key identifier moved to `new_vault`.
    async fn rekeyed_properties(
        &self,
        source: &BlobLocation,
        new_vault: &VaultIdentity,
    ) -> Result<BlobMetadata> {
        let mut metadata = self.source.get_properties(source).await?;
        let encryption = EncryptionMetadata::from_blob_metadata(&metadata)?
            .ok_or_else(|| EnvelopeError::MissingEncryptionData(source.to_string()))?;
        encryption.with_vault(new_vault)?.attach(&mut metadata)?;
        Ok(metadata)
    }
}

async fn poll_copy(
    store: &dyn BlobStore,
    handle: &CopyHandle,
    interval: Duration,
    mut cancel: CancelSignal,
) -> Result<()> {
    loop {
        check_cancelled(&cancel)?;
        match store.copy_status(handle).await? {
            CopyStatus::Success => return Ok(()),
            CopyStatus::Failed(reason) => {
                return Err(EnvelopeError::CopyFailed {
                    copy_id: handle.copy_id.clone(),
                    reason,
                })
            }
            CopyStatus::Pending => {}
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            Ok(()) = cancel.changed() => {}
        }
    }
}
