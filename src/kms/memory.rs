//! InMemoryKms: a key-management service holding P-256 master keys per vault.
//!
//! Each key name keeps its versions in creation order; lookups by name return
//! the newest version. Wrap uses only the public key; unwrap uses the private
//! key, which never leaves this type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use envelope_crypto::{generate_master_key, unwrap_key, wrap_key, CryptoError, SecretKey};
use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use super::traits::{KeyHandle, KeyManagementService};
use crate::error::KmsError;
use crate::types::{KeyIdentifier, KeySpec, VaultIdentity, WrapAlgorithm};

#[derive(Clone)]
struct StoredKey {
    version: String,
    spec: KeySpec,
    secret: SecretKey,
}

/// vault → key name → versions, oldest first
type VaultMap = HashMap<VaultIdentity, HashMap<String, Vec<StoredKey>>>;

#[derive(Default)]
pub struct InMemoryKms {
    vaults: Mutex<VaultMap>,
    create_latency: Option<Duration>,
    unavailable: AtomicBool,
    create_calls: AtomicUsize,
    wrap_calls: AtomicUsize,
    unwrap_calls: AtomicUsize,
}

impl InMemoryKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every key creation, widening the window for racing creators.
    pub fn with_create_latency(mut self, latency: Duration) -> Self {
        self.create_latency = Some(latency);
        self
    }

    /// Make every call fail with a transport error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy the current version of a key into another vault, bit for bit,
    /// keeping its version id. Models a vault backup restored elsewhere.
    pub fn replicate_key(
        &self,
        from: &VaultIdentity,
        to: &VaultIdentity,
        name: &str,
    ) -> Result<KeyHandle, KmsError> {
        let mut vaults = self.vaults.lock();
        let stored = vaults
            .get(from)
            .and_then(|keys| keys.get(name))
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| KmsError::NotFound {
                vault: from.to_string(),
                name: name.to_string(),
            })?;
        let handle = handle_for(to, name, &stored);
        vaults
            .entry(to.clone())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(stored);
        debug!(from = %from, to = %to, name, "replicated key");
        Ok(handle)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn wrap_calls(&self) -> usize {
        self.wrap_calls.load(Ordering::SeqCst)
    }

    pub fn unwrap_calls(&self) -> usize {
        self.unwrap_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), KmsError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KmsError::Transport("key vault unreachable".to_string()));
        }
        Ok(())
    }

    fn find(&self, key: &KeyIdentifier) -> Result<StoredKey, KmsError> {
        let vaults = self.vaults.lock();
        let versions = vaults
            .get(&key.vault)
            .and_then(|keys| keys.get(&key.name))
            .ok_or_else(|| KmsError::NotFound {
                vault: key.vault.to_string(),
                name: key.name.clone(),
            })?;
        let stored = match &key.version {
            Some(version) => versions.iter().find(|k| &k.version == version),
            None => versions.last(),
        };
        stored.cloned().ok_or_else(|| KmsError::NotFound {
            vault: key.vault.to_string(),
            name: key.name.clone(),
        })
    }
}

fn handle_for(vault: &VaultIdentity, name: &str, stored: &StoredKey) -> KeyHandle {
    KeyHandle {
        id: KeyIdentifier::new(vault.clone(), name, Some(stored.version.clone())),
        spec: stored.spec,
    }
}

#[async_trait]
impl KeyManagementService for InMemoryKms {
    async fn get_key(
        &self,
        vault: &VaultIdentity,
        name: &str,
    ) -> Result<Option<KeyHandle>, KmsError> {
        self.check_available()?;
        let vaults = self.vaults.lock();
        Ok(vaults
            .get(vault)
            .and_then(|keys| keys.get(name))
            .and_then(|versions| versions.last())
            .map(|stored| handle_for(vault, name, stored)))
    }

    async fn get_key_version(
        &self,
        vault: &VaultIdentity,
        name: &str,
        version: &str,
    ) -> Result<Option<KeyHandle>, KmsError> {
        self.check_available()?;
        let vaults = self.vaults.lock();
        Ok(vaults
            .get(vault)
            .and_then(|keys| keys.get(name))
            .and_then(|versions| versions.iter().find(|k| k.version == version))
            .map(|stored| handle_for(vault, name, stored)))
    }

    async fn create_asymmetric_key(
        &self,
        vault: &VaultIdentity,
        name: &str,
        spec: KeySpec,
    ) -> Result<KeyHandle, KmsError> {
        self.check_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.create_latency {
            tokio::time::sleep(latency).await;
        }

        let secret = match spec {
            KeySpec::EcP256 => generate_master_key(),
        };
        let stored = StoredKey {
            version: uuid::Uuid::new_v4().simple().to_string(),
            spec,
            secret,
        };
        let handle = handle_for(vault, name, &stored);
        self.vaults
            .lock()
            .entry(vault.clone())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(stored);
        debug!(key = %handle.id, %spec, "created key");
        Ok(handle)
    }

    async fn wrap(
        &self,
        key: &KeyIdentifier,
        algorithm: WrapAlgorithm,
        dek: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        self.check_available()?;
        self.wrap_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.find(key)?;
        match (stored.spec, algorithm) {
            (KeySpec::EcP256, WrapAlgorithm::EcdhEsA256Kw) => {
                wrap_key(&stored.secret.public_key(), dek)
                    .map_err(|e| KmsError::Operation(e.to_string()))
            }
        }
    }

    async fn unwrap(
        &self,
        key: &KeyIdentifier,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.check_available()?;
        self.unwrap_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.find(key)?;
        match (stored.spec, algorithm) {
            (KeySpec::EcP256, WrapAlgorithm::EcdhEsA256Kw) => {
                unwrap_key(&stored.secret, wrapped).map_err(|e| match e {
                    CryptoError::InvalidWrappedKeyLength { .. }
                    | CryptoError::InvalidPublicKey(_)
                    | CryptoError::UnwrapFailed(_) => KmsError::Rejected(e.to_string()),
                    other => KmsError::Operation(other.to_string()),
                })
            }
        }
    }
}
