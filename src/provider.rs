//! MasterKeyProvider: named asymmetric master keys in a key vault.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{EnvelopeError, Result};
use crate::kms::{KeyHandle, KeyManagementService};
use crate::types::{KeyIdentifier, KeySpec, VaultIdentity, WrapAlgorithm};

type CreationLocks = HashMap<(VaultIdentity, String), Arc<tokio::sync::Mutex<()>>>;

/// Resolves master keys and performs wrap/unwrap through the KMS.
///
/// Cheap to clone; clones share the KMS client and the provisioning locks.
#[derive(Clone)]
pub struct MasterKeyProvider {
    kms: Arc<dyn KeyManagementService>,
    creation_locks: Arc<Mutex<CreationLocks>>,
}

impl MasterKeyProvider {
    pub fn new(kms: Arc<dyn KeyManagementService>) -> Self {
        Self {
            kms,
            creation_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current version of `name` in `vault`, or `None` when absent.
    pub async fn lookup(&self, vault: &VaultIdentity, name: &str) -> Result<Option<KeyHandle>> {
        Ok(self.kms.get_key(vault, name).await?)
    }

    /// The exact version of `name` in `vault`, or `None` when the vault does
    /// not hold that version.
    pub async fn lookup_version(
        &self,
        vault: &VaultIdentity,
        name: &str,
        version: &str,
    ) -> Result<Option<KeyHandle>> {
        Ok(self.kms.get_key_version(vault, name, version).await?)
    }

    /// Current version of `name` in `vault`. Fails with `KeyNotFound` when absent.
    pub async fn resolve(&self, vault: &VaultIdentity, name: &str) -> Result<KeyHandle> {
        self.lookup(vault, name)
            .await?
            .ok_or_else(|| EnvelopeError::KeyNotFound {
                vault: vault.to_string(),
                name: name.to_string(),
            })
    }

    /// Identifier of the current version of `name` in `vault`.
    pub async fn key_identifier(&self, vault: &VaultIdentity, name: &str) -> Result<KeyIdentifier> {
        Ok(self.resolve(vault, name).await?.id)
    }

    /// Resolve `name`, creating it when the vault has no such key.
    ///
    /// Concurrent callers for the same (vault, name) are serialized, so the
    /// KMS sees a single creation and every caller gets the same handle.
    pub async fn get_or_create(
        &self,
        vault: &VaultIdentity,
        name: &str,
        spec: KeySpec,
    ) -> Result<KeyHandle> {
        if let Some(handle) = self.lookup(vault, name).await? {
            return Ok(handle);
        }

        let lock = {
            let mut locks = self.creation_locks.lock();
            Arc::clone(
                locks
                    .entry((vault.clone(), name.to_string()))
                    .or_default(),
            )
        };
        let _guard = lock.lock().await;

        // Another caller may have created it while we waited.
        if let Some(handle) = self.lookup(vault, name).await? {
            debug!(key = %handle.id, "key created by a concurrent caller");
            return Ok(handle);
        }

        let handle = self.kms.create_asymmetric_key(vault, name, spec).await?;
        info!(key = %handle.id, %spec, "provisioned master key");
        Ok(handle)
    }

    /// Wrap a DEK under `key`.
    pub async fn wrap(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        dek: &[u8],
    ) -> Result<Vec<u8>> {
        let wrapped = self.kms.wrap(&key.id, algorithm, dek).await?;
        debug!(key = %key.id, %algorithm, "wrapped content key");
        Ok(wrapped)
    }

    /// Unwrap a DEK. Integrity rejections surface as `DecryptionFailed`.
    pub async fn unwrap(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let dek = self.kms.unwrap(&key.id, algorithm, wrapped).await?;
        debug!(key = %key.id, %algorithm, "unwrapped content key");
        Ok(dek)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kms::InMemoryKms;

    fn provider() -> (Arc<InMemoryKms>, MasterKeyProvider) {
        let kms = Arc::new(InMemoryKms::new());
        (kms.clone(), MasterKeyProvider::new(kms))
    }

    #[tokio::test]
    async fn resolve_missing_key_is_key_not_found() {
        let (_, provider) = provider();
        let err = provider.resolve(&"vault-a".into(), "k1").await.unwrap_err();
        assert!(
            matches!(err, EnvelopeError::KeyNotFound { vault, name } if vault == "vault-a" && name == "k1")
        );
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (kms, provider) = provider();
        let vault = VaultIdentity::new("vault-a");
        let first = provider.get_or_create(&vault, "k1", KeySpec::EcP256).await.unwrap();
        let second = provider.get_or_create(&vault, "k1", KeySpec::EcP256).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(kms.create_calls(), 1);
        assert_eq!(provider.resolve(&vault, "k1").await.unwrap(), first);
        assert_eq!(provider.key_identifier(&vault, "k1").await.unwrap(), first.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_creates_one_key() {
        let kms = Arc::new(InMemoryKms::new().with_create_latency(Duration::from_millis(20)));
        let provider = MasterKeyProvider::new(kms.clone());
        let vault = VaultIdentity::new("vault-a");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                let vault = vault.clone();
                tokio::spawn(async move { provider.get_or_create(&vault, "k1", KeySpec::EcP256).await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }
        assert_eq!(kms.create_calls(), 1);
        assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn wrap_unwrap_through_provider() {
        let (_, provider) = provider();
        let key = provider
            .get_or_create(&"vault-a".into(), "k1", KeySpec::EcP256)
            .await
            .unwrap();
        let wrapped = provider.wrap(&key, WrapAlgorithm::EcdhEsA256Kw, &[7u8; 32]).await.unwrap();
        let dek = provider.unwrap(&key, WrapAlgorithm::EcdhEsA256Kw, &wrapped).await.unwrap();
        assert_eq!(dek.as_slice(), &[7u8; 32]);
    }

    #[tokio::test]
    async fn tampered_wrapped_key_is_decryption_failed() {
        let (_, provider) = provider();
        let key = provider
            .get_or_create(&"vault-a".into(), "k1", KeySpec::EcP256)
            .await
            .unwrap();
        let mut wrapped = provider.wrap(&key, WrapAlgorithm::EcdhEsA256Kw, &[7u8; 32]).await.unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x80;
        let err = provider
            .unwrap(&key, WrapAlgorithm::EcdhEsA256Kw, &wrapped)
            .await
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::DecryptionFailed(_)));
    }

    #[tokio::test]
    async fn unreachable_kms_is_crypto_operation_failed() {
        let (kms, provider) = provider();
        let key = provider
            .get_or_create(&"vault-a".into(), "k1", KeySpec::EcP256)
            .await
            .unwrap();
        kms.set_unavailable(true);
        let err = provider
            .wrap(&key, WrapAlgorithm::EcdhEsA256Kw, &[7u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::CryptoOperationFailed(_)));
    }
}
