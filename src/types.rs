//! Identifiers and small value types shared by the codec, the key layer and
//! the copy layer.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{EnvelopeError, Result};

/// DNS suffix of key vault hosts, used when rendering key identifiers.
pub const VAULT_DNS_SUFFIX: &str = "vault.azure.net";

/// Object-level attributes stored next to a blob.
pub type BlobMetadata = HashMap<String, String>;

/// Receiver half of a cancellation signal. `true` means cancelled.
pub type CancelSignal = watch::Receiver<bool>;

/// Create a cancellation pair. Send `true` on the sender to cancel.
pub fn cancellation() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

/// A signal that is never cancelled.
pub fn never_cancelled() -> CancelSignal {
    let (tx, rx) = watch::channel(false);
    // Receivers keep the last value once the sender is gone.
    drop(tx);
    rx
}

pub(crate) fn check_cancelled(cancel: &CancelSignal) -> Result<()> {
    if *cancel.borrow() {
        return Err(EnvelopeError::Cancelled);
    }
    Ok(())
}

/// Name of a key vault (the first label of its host name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultIdentity(String);

impl VaultIdentity {
    /// Unchecked; use [`parse`](Self::parse) for names from configuration
    /// or other untrusted input.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// A vault name that renders into a parseable key identifier.
    pub fn parse(name: &str) -> Result<Self> {
        check_name(name)?;
        Ok(Self::new(name))
    }

    /// Fail with `InvalidName` unless this name fits a key identifier.
    pub fn check(&self) -> Result<()> {
        check_name(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaultIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VaultIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("name pattern is valid"));

/// Vault and key names share the host-label character class.
pub fn check_name(name: &str) -> Result<()> {
    if !NAME_PATTERN.is_match(name) {
        return Err(EnvelopeError::InvalidName(name.to_string()));
    }
    Ok(())
}

static KEY_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://([A-Za-z0-9-]+)\.vault\.azure\.net/keys/([A-Za-z0-9-]+)(?:/([A-Za-z0-9]+))?/?$")
        .expect("key identifier pattern is valid")
});

/// Identifier of one master key version: vault, key name and version.
///
/// Rendered as `https://{vault}.vault.azure.net/keys/{name}/{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyIdentifier {
    pub vault: VaultIdentity,
    pub name: String,
    pub version: Option<String>,
}

impl KeyIdentifier {
    pub fn new(vault: VaultIdentity, name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            vault,
            name: name.into(),
            version,
        }
    }

    /// Fail unless the rendered form parses back to this identifier.
    pub fn check(&self) -> Result<()> {
        let rendered = self.to_string();
        match rendered.parse::<KeyIdentifier>() {
            Ok(parsed) if parsed == *self => Ok(()),
            _ => Err(EnvelopeError::InvalidKeyIdentifier(rendered)),
        }
    }

    /// The same key name and version, located in another vault.
    pub fn with_vault(&self, vault: VaultIdentity) -> Self {
        Self {
            vault,
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://{}.{}/keys/{}", self.vault, VAULT_DNS_SUFFIX, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "/{}", version)?;
        }
        Ok(())
    }
}

impl FromStr for KeyIdentifier {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = KEY_ID_PATTERN
            .captures(s)
            .ok_or_else(|| EnvelopeError::InvalidKeyIdentifier(s.to_string()))?;
        Ok(Self {
            vault: VaultIdentity::new(&caps[1]),
            name: caps[2].to_string(),
            version: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

/// Where a blob lives: storage account, container and blob name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobLocation {
    pub account: String,
    pub container: String,
    pub name: String,
}

impl BlobLocation {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            name: name.into(),
        }
    }

    /// Same blob name in another container of the same account.
    pub fn in_container(&self, container: impl Into<String>) -> Self {
        Self::new(self.account.clone(), container, self.name.clone())
    }

    /// Same container and blob name in another account.
    pub fn in_account(&self, account: impl Into<String>) -> Self {
        Self::new(account, self.container.clone(), self.name.clone())
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.container, self.name)
    }
}

/// Kind of asymmetric master key to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeySpec {
    /// NIST P-256 elliptic curve key.
    #[default]
    #[serde(rename = "EC-P256")]
    EcP256,
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::EcP256 => f.write_str("EC-P256"),
        }
    }
}

/// Algorithm used to wrap a DEK under a master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WrapAlgorithm {
    #[default]
    #[serde(rename = "ECDH-ES+A256KW")]
    EcdhEsA256Kw,
}

impl WrapAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            WrapAlgorithm::EcdhEsA256Kw => envelope_crypto::ECDH_ES_A256KW,
        }
    }
}

impl fmt::Display for WrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WrapAlgorithm {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            envelope_crypto::ECDH_ES_A256KW => Ok(WrapAlgorithm::EcdhEsA256Kw),
            other => Err(EnvelopeError::CryptoOperationFailed(format!(
                "unsupported key wrapping algorithm {}",
                other
            ))),
        }
    }
}
