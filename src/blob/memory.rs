//! InMemoryBlobService: storage accounts held in memory behind one fabric.
//!
//! Every account created from the same service shares the fabric, so a signed
//! reference minted by one account can be redeemed by another, while direct
//! internal references stay confined to their own account.
//!
//! Copies are accepted synchronously and completed by a background task after
//! the configured copy latency; callers observe them through `copy_status`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::traits::{BlobBody, BlobStore, CopyHandle, CopySource, CopyStatus, SignedReference};
use crate::error::StorageError;
use crate::types::{BlobLocation, BlobMetadata};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
struct StoredBlob {
    data: Vec<u8>,
    metadata: BlobMetadata,
}

struct AccountState {
    signing_key: [u8; 32],
    blobs: HashMap<BlobLocation, StoredBlob>,
    copies: HashMap<String, CopyStatus>,
}

impl AccountState {
    fn new() -> Self {
        let mut signing_key = [0u8; 32];
        signing_key[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        signing_key[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self {
            signing_key,
            blobs: HashMap::new(),
            copies: HashMap::new(),
        }
    }
}

struct Fabric {
    accounts: Mutex<HashMap<String, AccountState>>,
    copy_latency: Duration,
    /// When set, copies accepted from now on end in `CopyStatus::Failed`.
    copy_failure: Mutex<Option<String>>,
}

/// Entry point: creates and hands out per-account stores.
#[derive(Clone)]
pub struct InMemoryBlobService {
    fabric: Arc<Fabric>,
}

impl Default for InMemoryBlobService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobService {
    pub fn new() -> Self {
        Self::with_copy_latency(Duration::ZERO)
    }

    /// Copies complete `latency` after they are accepted.
    pub fn with_copy_latency(latency: Duration) -> Self {
        Self {
            fabric: Arc::new(Fabric {
                accounts: Mutex::new(HashMap::new()),
                copy_latency: latency,
                copy_failure: Mutex::new(None),
            }),
        }
    }

    /// Store for `name`, creating the account if it does not exist yet.
    pub fn account(&self, name: &str) -> InMemoryBlobStore {
        self.fabric
            .accounts
            .lock()
            .entry(name.to_string())
            .or_insert_with(AccountState::new);
        InMemoryBlobStore {
            account: name.to_string(),
            fabric: Arc::clone(&self.fabric),
        }
    }

    /// Make subsequently accepted copies fail with `reason` (or succeed again with `None`).
    pub fn set_copy_failure(&self, reason: Option<String>) {
        *self.fabric.copy_failure.lock() = reason;
    }
}

/// One storage account of an [`InMemoryBlobService`].
#[derive(Clone)]
pub struct InMemoryBlobStore {
    account: String,
    fabric: Arc<Fabric>,
}

impl InMemoryBlobStore {
    fn check_account(&self, location: &BlobLocation) -> Result<(), StorageError> {
        if location.account != self.account {
            return Err(StorageError::WrongAccount {
                expected: self.account.clone(),
                got: location.account.clone(),
            });
        }
        Ok(())
    }

    fn read_blob(&self, location: &BlobLocation) -> Result<StoredBlob, StorageError> {
        self.check_account(location)?;
        let accounts = self.fabric.accounts.lock();
        accounts
            .get(&self.account)
            .and_then(|state| state.blobs.get(location))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(location.to_string()))
    }

    /// Raw stored bytes, bypassing any codec. Lets tests inspect ciphertext.
    pub fn raw_bytes(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        Ok(self.read_blob(location)?.data)
    }

    /// Number of blobs currently stored in this account.
    pub fn blob_count(&self) -> usize {
        self.fabric
            .accounts
            .lock()
            .get(&self.account)
            .map(|state| state.blobs.len())
            .unwrap_or(0)
    }
}

fn sign(signing_key: &[u8], reference_body: &str) -> Result<HmacSha256, StorageError> {
    let mut mac =
        HmacSha256::new_from_slice(signing_key).map_err(|_| StorageError::InvalidSignature)?;
    mac.update(reference_body.as_bytes());
    Ok(mac)
}

fn reference_body(location: &BlobLocation, expires_at: &str) -> String {
    format!("r\n{}\n{}", location, expires_at)
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn account(&self) -> &str {
        &self.account
    }

    async fn put(
        &self,
        location: &BlobLocation,
        mut body: BlobBody,
        metadata: BlobMetadata,
    ) -> Result<(), StorageError> {
        self.check_account(location)?;
        // Buffer the whole body before committing so a failed stream leaves nothing behind.
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;

        let mut accounts = self.fabric.accounts.lock();
        let state = accounts
            .get_mut(&self.account)
            .ok_or_else(|| StorageError::AccountNotFound(self.account.clone()))?;
        debug!(location = %location, bytes = data.len(), "put blob");
        state
            .blobs
            .insert(location.clone(), StoredBlob { data, metadata });
        Ok(())
    }

    async fn get(&self, location: &BlobLocation) -> Result<(BlobBody, BlobMetadata), StorageError> {
        let blob = self.read_blob(location)?;
        let body: BlobBody = Box::new(std::io::Cursor::new(blob.data));
        Ok((body, blob.metadata))
    }

    async fn get_properties(&self, location: &BlobLocation) -> Result<BlobMetadata, StorageError> {
        Ok(self.read_blob(location)?.metadata)
    }

    async fn copy_from_reference(
        &self,
        source: CopySource,
        destination: &BlobLocation,
        metadata: BlobMetadata,
    ) -> Result<CopyHandle, StorageError> {
        self.check_account(destination)?;

        let data = {
            let accounts = self.fabric.accounts.lock();
            let source_location = source.location();
            let source_state = accounts
                .get(&source_location.account)
                .ok_or_else(|| StorageError::AccountNotFound(source_location.account.clone()))?;

            match &source {
                CopySource::Internal(location) => {
                    if location.account != self.account {
                        return Err(StorageError::CrossAccountReference {
                            source_account: location.account.clone(),
                            destination_account: self.account.clone(),
                        });
                    }
                }
                CopySource::Signed(reference) => {
                    let expected = hex::decode(&reference.signature)
                        .map_err(|_| StorageError::InvalidSignature)?;
                    let body =
                        reference_body(&reference.location, &reference.expires_at.to_rfc3339());
                    sign(&source_state.signing_key, &body)?
                        .verify_slice(&expected)
                        .map_err(|_| StorageError::InvalidSignature)?;
                    if reference.is_expired() {
                        return Err(StorageError::ReferenceExpired {
                            expired_at: reference.expires_at,
                        });
                    }
                }
            }

            source_state
                .blobs
                .get(source_location)
                .map(|blob| blob.data.clone())
                .ok_or_else(|| StorageError::NotFound(source_location.to_string()))?
        };

        let copy_id = uuid::Uuid::new_v4().to_string();
        {
            let mut accounts = self.fabric.accounts.lock();
            let state = accounts
                .get_mut(&self.account)
                .ok_or_else(|| StorageError::AccountNotFound(self.account.clone()))?;
            state.copies.insert(copy_id.clone(), CopyStatus::Pending);
        }
        debug!(copy_id = %copy_id, source = %source.location(), destination = %destination, "copy accepted");

        let fabric = Arc::clone(&self.fabric);
        let account = self.account.clone();
        let task_copy_id = copy_id.clone();
        let task_destination = destination.clone();
        tokio::spawn(async move {
            if !fabric.copy_latency.is_zero() {
                tokio::time::sleep(fabric.copy_latency).await;
            }
            let failure = fabric.copy_failure.lock().clone();
            let mut accounts = fabric.accounts.lock();
            if let Some(state) = accounts.get_mut(&account) {
                let status = match failure {
                    Some(reason) => CopyStatus::Failed(reason),
                    None => {
                        state
                            .blobs
                            .insert(task_destination, StoredBlob { data, metadata });
                        CopyStatus::Success
                    }
                };
                state.copies.insert(task_copy_id, status);
            }
        });

        Ok(CopyHandle {
            copy_id,
            destination: destination.clone(),
        })
    }

    async fn copy_status(&self, handle: &CopyHandle) -> Result<CopyStatus, StorageError> {
        self.check_account(&handle.destination)?;
        let accounts = self.fabric.accounts.lock();
        accounts
            .get(&self.account)
            .and_then(|state| state.copies.get(&handle.copy_id))
            .cloned()
            .ok_or_else(|| StorageError::CopyNotFound(handle.copy_id.clone()))
    }

    async fn mint_signed_read_reference(
        &self,
        location: &BlobLocation,
        ttl: Duration,
    ) -> Result<SignedReference, StorageError> {
        self.check_account(location)?;
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or(StorageError::InvalidTtl {
                ttl_ms: ttl.as_millis(),
            })?;

        let accounts = self.fabric.accounts.lock();
        let state = accounts
            .get(&self.account)
            .ok_or_else(|| StorageError::AccountNotFound(self.account.clone()))?;
        let signature = sign(
            &state.signing_key,
            &reference_body(location, &expires_at.to_rfc3339()),
        )?
        .finalize()
        .into_bytes();

        Ok(SignedReference {
            location: location.clone(),
            expires_at,
            signature: hex::encode(signature),
        })
    }
}
