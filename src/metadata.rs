//! `encryptiondata` metadata: the record that travels with every encrypted blob.
//!
//! Serialized as JSON with PascalCase field names:
//!
//! ```json
//! {
//!   "WrappedContentKey": { "KeyId": "...", "EncryptedKey": "<base64>", "Algorithm": "ECDH-ES+A256KW" },
//!   "EncryptionAgent": { "Protocol": "2.0", "EncryptionAlgorithm": "AES_GCM_256" },
//!   "EncryptedRegionInfo": { "DataLength": 4194304, "NonceLength": 12 },
//!   "ContentEncryptionIV": "<base64>",
//!   "KeyWrappingMetadata": { "EncryptionLibrary": "keyvault-envelope 0.1.0" }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::types::{BlobMetadata, KeyIdentifier, VaultIdentity};

/// Blob metadata key holding the serialized [`EncryptionMetadata`].
pub const ENCRYPTION_DATA_KEY: &str = "encryptiondata";

/// Protocol tag written by this codec version.
pub const PROTOCOL_V2: &str = "2.0";

/// Content cipher tag written by this codec version.
pub const AES_GCM_256: &str = "AES_GCM_256";

/// Protocols this codec can decrypt.
pub const SUPPORTED_PROTOCOLS: &[&str] = &[PROTOCOL_V2];

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WrappedContentKey {
    /// Master key identifier. The only pointer back to the key.
    pub key_id: String,
    #[serde(with = "base64_bytes")]
    pub encrypted_key: Vec<u8>,
    /// Key wrapping algorithm tag.
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptionAgent {
    pub protocol: String,
    pub encryption_algorithm: String,
}

impl EncryptionAgent {
    pub fn current() -> Self {
        Self {
            protocol: PROTOCOL_V2.to_string(),
            encryption_algorithm: AES_GCM_256.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptedRegionInfo {
    pub data_length: usize,
    pub nonce_length: usize,
}

/// Key metadata persisted alongside the ciphertext of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptionMetadata {
    pub wrapped_content_key: WrappedContentKey,
    pub encryption_agent: EncryptionAgent,
    pub encrypted_region_info: EncryptedRegionInfo,
    #[serde(rename = "ContentEncryptionIV", with = "base64_bytes")]
    pub content_encryption_iv: Vec<u8>,
    #[serde(default)]
    pub key_wrapping_metadata: BTreeMap<String, String>,
}

impl EncryptionMetadata {
    /// Parse from the JSON stored under [`ENCRYPTION_DATA_KEY`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EnvelopeError::InvalidMetadata(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::InvalidMetadata(e.to_string()))
    }

    /// Read the metadata attached to a blob, if any.
    pub fn from_blob_metadata(metadata: &BlobMetadata) -> Result<Option<Self>> {
        metadata
            .get(ENCRYPTION_DATA_KEY)
            .map(|json| Self::from_json(json))
            .transpose()
    }

    /// Store this record under [`ENCRYPTION_DATA_KEY`], leaving other entries untouched.
    pub fn attach(&self, metadata: &mut BlobMetadata) -> Result<()> {
        metadata.insert(ENCRYPTION_DATA_KEY.to_string(), self.to_json()?);
        Ok(())
    }

    /// Fail with `UnsupportedProtocolVersion` unless this codec understands the agent.
    pub fn check_agent(&self) -> Result<()> {
        let agent = &self.encryption_agent;
        if !SUPPORTED_PROTOCOLS.contains(&agent.protocol.as_str()) {
            return Err(EnvelopeError::UnsupportedProtocolVersion(agent.protocol.clone()));
        }
        if agent.encryption_algorithm != AES_GCM_256 {
            return Err(EnvelopeError::UnsupportedProtocolVersion(format!(
                "{} with {}",
                agent.protocol, agent.encryption_algorithm
            )));
        }
        Ok(())
    }

    /// The master key identifier embedded in the wrapped content key.
    pub fn key_identifier(&self) -> Result<KeyIdentifier> {
        self.wrapped_content_key.key_id.parse()
    }

    /// Copy of this record pointing at the same key name in another vault.
    ///
    /// Only the vault component of the key identifier changes; the encrypted
    /// key bytes and the IV are carried over as-is.
    pub fn with_vault(&self, vault: &VaultIdentity) -> Result<Self> {
        vault.check()?;
        let key_id = self.key_identifier()?.with_vault(vault.clone());
        let mut rekeyed = self.clone();
        rekeyed.wrapped_content_key.key_id = key_id.to_string();
        Ok(rekeyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptionMetadata {
        EncryptionMetadata {
            wrapped_content_key: WrappedContentKey {
                key_id: "https://vault-a.vault.azure.net/keys/k1/abc123".to_string(),
                encrypted_key: vec![1, 2, 3, 4],
                algorithm: "ECDH-ES+A256KW".to_string(),
            },
            encryption_agent: EncryptionAgent::current(),
            encrypted_region_info: EncryptedRegionInfo {
                data_length: 4 * 1024 * 1024,
                nonce_length: 12,
            },
            content_encryption_iv: vec![9; 12],
            key_wrapping_metadata: BTreeMap::from([(
                "EncryptionLibrary".to_string(),
                "keyvault-envelope 0.1.0".to_string(),
            )]),
        }
    }

    #[test]
    fn json_uses_pascal_case_fields() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["WrappedContentKey"]["Algorithm"], "ECDH-ES+A256KW");
        assert_eq!(value["WrappedContentKey"]["EncryptedKey"], "AQIDBA==");
        assert_eq!(value["EncryptionAgent"]["Protocol"], "2.0");
        assert_eq!(value["EncryptedRegionInfo"]["NonceLength"], 12);
        assert!(value["ContentEncryptionIV"].is_string());
        assert_eq!(EncryptionMetadata::from_json(&json).unwrap(), sample());
    }

    #[test]
    fn attach_preserves_other_entries() {
        let mut metadata = BlobMetadata::new();
        metadata.insert("content-type".to_string(), "text/plain".to_string());
        sample().attach(&mut metadata).unwrap();
        assert_eq!(metadata["content-type"], "text/plain");
        let parsed = EncryptionMetadata::from_blob_metadata(&metadata).unwrap().unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn missing_entry_is_none() {
        assert!(EncryptionMetadata::from_blob_metadata(&BlobMetadata::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_json_is_invalid_metadata() {
        let err = EncryptionMetadata::from_json("{\"WrappedContentKey\":").unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidMetadata(_)));
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let mut metadata = sample();
        metadata.encryption_agent.protocol = "1.0".to_string();
        assert!(matches!(
            metadata.check_agent(),
            Err(EnvelopeError::UnsupportedProtocolVersion(p)) if p == "1.0"
        ));
        assert!(sample().check_agent().is_ok());
    }

    #[test]
    fn unknown_content_cipher_is_rejected() {
        let mut metadata = sample();
        metadata.encryption_agent.encryption_algorithm = "AES_CBC_256".to_string();
        assert!(matches!(
            metadata.check_agent(),
            Err(EnvelopeError::UnsupportedProtocolVersion(_))
        ));
    }

    #[test]
    fn with_vault_rewrites_only_the_vault() {
        let original = sample();
        let rekeyed = original.with_vault(&VaultIdentity::new("vault-b")).unwrap();
        assert_eq!(
            rekeyed.wrapped_content_key.key_id,
            "https://vault-b.vault.azure.net/keys/k1/abc123"
        );
        assert_eq!(
            rekeyed.wrapped_content_key.encrypted_key,
            original.wrapped_content_key.encrypted_key
        );
        assert_eq!(rekeyed.content_encryption_iv, original.content_encryption_iv);
        assert_eq!(rekeyed.encryption_agent, original.encryption_agent);
    }

    #[test]
    fn with_vault_ignores_vault_name_elsewhere() {
        // A key named after the vault must not be touched by the rewrite.
        let mut original = sample();
        original.wrapped_content_key.key_id =
            "https://vault-a.vault.azure.net/keys/vault-a/abc123".to_string();
        let rekeyed = original.with_vault(&VaultIdentity::new("vault-b")).unwrap();
        assert_eq!(
            rekeyed.wrapped_content_key.key_id,
            "https://vault-b.vault.azure.net/keys/vault-a/abc123"
        );
    }

    #[test]
    fn with_vault_rejects_names_that_break_the_identifier() {
        let err = sample().with_vault(&VaultIdentity::new("vault.b")).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidName(n) if n == "vault.b"));
    }
}
