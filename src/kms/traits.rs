//! Key-management service interface.

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::KmsError;
use crate::types::{KeyIdentifier, KeySpec, VaultIdentity, WrapAlgorithm};

/// A resolved master key: where it lives and what kind it is.
///
/// Holding a handle grants nothing by itself; wrap and unwrap still go
/// through the key-management service with its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub id: KeyIdentifier,
    pub spec: KeySpec,
}

impl KeyHandle {
    pub fn vault(&self) -> &VaultIdentity {
        &self.id.vault
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }
}

/// External service that stores asymmetric master keys and performs
/// wrap/unwrap with them. Private key material never leaves the service.
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Current version of the named key, or `None` if the vault has no such key.
    async fn get_key(
        &self,
        vault: &VaultIdentity,
        name: &str,
    ) -> Result<Option<KeyHandle>, KmsError>;

    /// A specific version of the named key, or `None` if the vault does not
    /// hold that version.
    async fn get_key_version(
        &self,
        vault: &VaultIdentity,
        name: &str,
        version: &str,
    ) -> Result<Option<KeyHandle>, KmsError>;

    /// Create a new asymmetric key (or a new version of an existing name).
    async fn create_asymmetric_key(
        &self,
        vault: &VaultIdentity,
        name: &str,
        spec: KeySpec,
    ) -> Result<KeyHandle, KmsError>;

    /// Wrap `dek` under the key identified by `key`.
    async fn wrap(
        &self,
        key: &KeyIdentifier,
        algorithm: WrapAlgorithm,
        dek: &[u8],
    ) -> Result<Vec<u8>, KmsError>;

    /// Unwrap bytes produced by [`wrap`](Self::wrap).
    ///
    /// Returns `KmsError::Rejected` when the bytes do not verify under this key.
    async fn unwrap(
        &self,
        key: &KeyIdentifier,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}
