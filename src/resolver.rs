//! KeyResolver: maps the key identifier stored in metadata to a live key.

use tracing::{debug, warn};

use crate::error::{EnvelopeError, Result};
use crate::kms::KeyHandle;
use crate::provider::MasterKeyProvider;
use crate::types::{KeyIdentifier, VaultIdentity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// Query the vault named in the identifier.
    Direct,
    /// Query the backup vault first, then the vault named in the identifier.
    Rotated { backup_vault: VaultIdentity },
}

#[derive(Clone)]
pub struct KeyResolver {
    provider: MasterKeyProvider,
    strategy: ResolveStrategy,
}

impl KeyResolver {
    pub fn new(provider: MasterKeyProvider, strategy: ResolveStrategy) -> Self {
        Self { provider, strategy }
    }

    pub fn direct(provider: MasterKeyProvider) -> Self {
        Self::new(provider, ResolveStrategy::Direct)
    }

    pub fn rotated(provider: MasterKeyProvider, backup_vault: VaultIdentity) -> Self {
        Self::new(provider, ResolveStrategy::Rotated { backup_vault })
    }

    pub fn provider(&self) -> &MasterKeyProvider {
        &self.provider
    }

    pub fn strategy(&self) -> &ResolveStrategy {
        &self.strategy
    }

    /// Find the key that can unwrap content keys wrapped under `id`.
    ///
    /// The version recorded in `id` wins: every candidate vault is asked for
    /// it first. Only when no candidate holds that version does resolution
    /// fall back to the current version of the name, which is how a distinct
    /// same-named backup key is reached.
    pub async fn resolve(&self, id: &KeyIdentifier) -> Result<KeyHandle> {
        let mut candidates = Vec::with_capacity(2);
        if let ResolveStrategy::Rotated { backup_vault } = &self.strategy {
            candidates.push(backup_vault.clone());
        }
        if !candidates.contains(&id.vault) {
            candidates.push(id.vault.clone());
        }

        if let Some(version) = id.version.as_deref() {
            for vault in &candidates {
                if let Some(handle) = self.provider.lookup_version(vault, &id.name, version).await? {
                    debug!(requested = %id, resolved = %handle.id, "resolved master key");
                    return Ok(handle);
                }
            }
        }

        for vault in &candidates {
            if let Some(handle) = self.provider.lookup(vault, &id.name).await? {
                if id.version.is_some() {
                    warn!(
                        requested = %id,
                        resolved = %handle.id,
                        "recorded key version not found; using the current version"
                    );
                }
                debug!(requested = %id, resolved = %handle.id, "resolved master key");
                return Ok(handle);
            }
            debug!(vault = %vault, name = %id.name, "key not present in vault");
        }

        Err(EnvelopeError::KeyNotFound {
            vault: candidates
                .first()
                .map(VaultIdentity::to_string)
                .unwrap_or_else(|| id.vault.to_string()),
            name: id.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::kms::traits::KeyManagementService;
    use crate::kms::InMemoryKms;
    use crate::types::KeySpec;

    async fn setup() -> (Arc<InMemoryKms>, MasterKeyProvider, KeyHandle) {
        let kms = Arc::new(InMemoryKms::new());
        let provider = MasterKeyProvider::new(kms.clone());
        let key = provider
            .get_or_create(&"vault-a".into(), "k1", KeySpec::EcP256)
            .await
            .unwrap();
        (kms, provider, key)
    }

    #[tokio::test]
    async fn direct_uses_identifier_vault() {
        let (_, provider, key) = setup().await;
        let resolver = KeyResolver::direct(provider);
        assert_eq!(resolver.resolve(&key.id).await.unwrap(), key);
    }

    #[tokio::test]
    async fn direct_missing_vault_is_key_not_found() {
        let (_, provider, key) = setup().await;
        let resolver = KeyResolver::direct(provider);
        let err = resolver
            .resolve(&key.id.with_vault("vault-b".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::KeyNotFound { vault, .. } if vault == "vault-b"));
    }

    #[tokio::test]
    async fn rotated_prefers_backup_vault() {
        let (kms, provider, key) = setup().await;
        let backup = kms
            .replicate_key(&"vault-a".into(), &"vault-b".into(), "k1")
            .unwrap();
        let resolver = KeyResolver::rotated(provider, "vault-b".into());
        let resolved = resolver.resolve(&key.id).await.unwrap();
        assert_eq!(resolved, backup);
        assert_eq!(resolved.vault().as_str(), "vault-b");
    }

    #[tokio::test]
    async fn rotated_falls_back_to_literal_vault() {
        let (_, provider, key) = setup().await;
        let resolver = KeyResolver::rotated(provider, "vault-b".into());
        assert_eq!(resolver.resolve(&key.id).await.unwrap(), key);
    }

    #[tokio::test]
    async fn rotated_without_any_key_fails() {
        let (_, provider, key) = setup().await;
        let resolver = KeyResolver::rotated(provider, "vault-b".into());
        let err = resolver
            .resolve(&key.id.with_vault("vault-c".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::KeyNotFound { vault, .. } if vault == "vault-b"));
    }

    #[tokio::test]
    async fn recorded_version_wins_over_current() {
        let (kms, provider, key) = setup().await;
        let newer = kms
            .create_asymmetric_key(&"vault-a".into(), "k1", KeySpec::EcP256)
            .await
            .unwrap();
        assert_ne!(newer, key);
        let resolver = KeyResolver::direct(provider);
        assert_eq!(resolver.resolve(&key.id).await.unwrap(), key);
        assert_eq!(resolver.resolve(&newer.id).await.unwrap(), newer);
    }

    #[tokio::test]
    async fn rotated_finds_recorded_version_in_literal_vault() {
        let (kms, provider, key) = setup().await;
        kms.create_asymmetric_key(&"vault-b".into(), "k1", KeySpec::EcP256)
            .await
            .unwrap();
        let resolver = KeyResolver::rotated(provider, "vault-b".into());
        assert_eq!(resolver.resolve(&key.id).await.unwrap(), key);
    }

    #[tokio::test]
    async fn unknown_version_falls_back_to_current() {
        let (_, provider, key) = setup().await;
        let resolver = KeyResolver::direct(provider);
        let stale = KeyIdentifier::new(key.id.vault.clone(), "k1", Some("0000".into()));
        assert_eq!(resolver.resolve(&stale).await.unwrap(), key);
    }

    #[tokio::test]
    async fn unversioned_identifier_uses_current() {
        let (_, provider, key) = setup().await;
        let resolver = KeyResolver::direct(provider);
        let bare = KeyIdentifier::new(key.id.vault.clone(), "k1", None);
        assert_eq!(resolver.resolve(&bare).await.unwrap(), key);
    }
}
