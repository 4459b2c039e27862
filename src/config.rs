//! Settings for the rotation workflow.
//!
//! Loaded in layers: built-in defaults, then an optional JSON file with
//! PascalCase keys, then `KVE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecOptions;
use crate::error::{EnvelopeError, Result};
use crate::rekey::CopyOptions;
use crate::types::{check_name, KeySpec, VaultIdentity, WrapAlgorithm};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "KVE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// Storage account holding the original objects.
    pub storage_account: String,
    /// Storage account receiving cross-account copies.
    pub storage_account_backup: String,
    pub vault_name: String,
    pub vault_name_backup: String,
    pub key_name: String,
    pub container_name: String,
    pub copy_container_name: String,
    pub other_container_name: String,
    pub key_spec: KeySpec,
    pub wrap_algorithm: WrapAlgorithm,
    /// Plaintext bytes per sealed region.
    pub region_length: usize,
    pub signed_reference_ttl_secs: u64,
    pub copy_timeout_secs: u64,
    pub copy_poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_account: "nomdustorage".to_string(),
            storage_account_backup: "nomdustoragebackup".to_string(),
            vault_name: "nomdu-keyvault".to_string(),
            vault_name_backup: "nomdu-keyvault-backup".to_string(),
            key_name: "nomdustorage-masterkey".to_string(),
            container_name: "tenant-y".to_string(),
            copy_container_name: "tenant-y-copy".to_string(),
            other_container_name: "tenant-y-other".to_string(),
            key_spec: KeySpec::default(),
            wrap_algorithm: WrapAlgorithm::default(),
            region_length: envelope_crypto::DEFAULT_REGION_LENGTH,
            signed_reference_ttl_secs: 120,
            copy_timeout_secs: 60,
            copy_poll_interval_ms: 250,
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `path` when it exists, then with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EnvelopeError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| EnvelopeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `KVE_*` overrides obtained through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        for (suffix, field) in [
            ("STORAGE_ACCOUNT", &mut self.storage_account),
            ("STORAGE_ACCOUNT_BACKUP", &mut self.storage_account_backup),
            ("VAULT_NAME", &mut self.vault_name),
            ("VAULT_NAME_BACKUP", &mut self.vault_name_backup),
            ("KEY_NAME", &mut self.key_name),
            ("CONTAINER_NAME", &mut self.container_name),
            ("COPY_CONTAINER_NAME", &mut self.copy_container_name),
            ("OTHER_CONTAINER_NAME", &mut self.other_container_name),
        ] {
            if let Some(value) = var(suffix) {
                *field = value;
            }
        }

        if let Some(value) = var("REGION_LENGTH") {
            self.region_length = parse_number("REGION_LENGTH", &value)?;
        }
        for (suffix, field) in [
            ("SIGNED_REFERENCE_TTL_SECS", &mut self.signed_reference_ttl_secs),
            ("COPY_TIMEOUT_SECS", &mut self.copy_timeout_secs),
            ("COPY_POLL_INTERVAL_MS", &mut self.copy_poll_interval_ms),
        ] {
            if let Some(value) = var(suffix) {
                *field = parse_number(suffix, &value)?;
            }
        }
        if let Some(value) = var("WRAP_ALGORITHM") {
            self.wrap_algorithm = value
                .parse()
                .map_err(|e: EnvelopeError| EnvelopeError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.region_length == 0 || self.region_length > envelope_crypto::MAX_REGION_LENGTH {
            return Err(EnvelopeError::Config(format!(
                "RegionLength must be in 1..={}",
                envelope_crypto::MAX_REGION_LENGTH
            )));
        }
        if self.copy_poll_interval_ms == 0 {
            return Err(EnvelopeError::Config(
                "CopyPollIntervalMs must be non-zero".to_string(),
            ));
        }
        for (name, value) in [
            ("StorageAccount", &self.storage_account),
            ("StorageAccountBackup", &self.storage_account_backup),
            ("VaultName", &self.vault_name),
            ("VaultNameBackup", &self.vault_name_backup),
            ("KeyName", &self.key_name),
        ] {
            if value.is_empty() {
                return Err(EnvelopeError::Config(format!("{} must not be empty", name)));
            }
        }
        for (name, value) in [
            ("VaultName", &self.vault_name),
            ("VaultNameBackup", &self.vault_name_backup),
            ("KeyName", &self.key_name),
        ] {
            check_name(value).map_err(|e| EnvelopeError::Config(format!("{}: {}", name, e)))?;
        }
        if self.storage_account == self.storage_account_backup {
            return Err(EnvelopeError::Config(
                "StorageAccount and StorageAccountBackup must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn vault(&self) -> VaultIdentity {
        VaultIdentity::new(&self.vault_name)
    }

    pub fn backup_vault(&self) -> VaultIdentity {
        VaultIdentity::new(&self.vault_name_backup)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }

    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions {
            region_length: self.region_length,
        }
    }

    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            signed_reference_ttl: Duration::from_secs(self.signed_reference_ttl_secs),
            poll_interval: Duration::from_millis(self.copy_poll_interval_ms),
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EnvelopeError::Config(format!("{}{} is not a number: {}", ENV_PREFIX, name, value)))
}
