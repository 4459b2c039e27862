//! RotationScenario: the end-to-end key rotation workflow.
//!
//! Upload under the primary vault key, then copy the object three ways and
//! read every copy back:
//!
//! 1. same account, metadata verbatim, read with the primary key;
//! 2. same account, rekeyed to the backup vault, read with the backup key;
//! 3. backup account through a signed reference, rekeyed, read with the backup key.
//!
//! Every download is compared with the uploaded plaintext.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::blob::BlobStore;
use crate::client::EncryptedBlobClient;
use crate::codec::EnvelopeCodec;
use crate::config::Settings;
use crate::error::{EnvelopeError, Result};
use crate::metadata::EncryptionMetadata;
use crate::provider::MasterKeyProvider;
use crate::rekey::RekeyCopier;
use crate::resolver::KeyResolver;
use crate::types::{check_cancelled, BlobLocation, BlobMetadata, CancelSignal};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub source: BlobLocation,
    pub plaintext: Vec<u8>,
    pub metadata: EncryptionMetadata,
    /// Copies that were read back and matched the plaintext, in order.
    pub verified: Vec<BlobLocation>,
}

pub struct RotationScenario {
    settings: Settings,
    provider: MasterKeyProvider,
    primary: Arc<dyn BlobStore>,
    backup: Arc<dyn BlobStore>,
}

impl RotationScenario {
    pub fn new(
        settings: Settings,
        provider: MasterKeyProvider,
        primary: Arc<dyn BlobStore>,
        backup: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            settings,
            provider,
            primary,
            backup,
        }
    }

    /// Default payload: `Hello - <RFC 3339 timestamp with milliseconds>`.
    pub fn default_message() -> String {
        format!(
            "Hello - {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
        )
    }

    pub async fn run(&self, message: Option<String>, cancel: &CancelSignal) -> Result<ScenarioReport> {
        let settings = &self.settings;
        let vault = settings.vault();
        let backup_vault = settings.backup_vault();
        let timeout = settings.copy_timeout();
        let plaintext = message.unwrap_or_else(Self::default_message).into_bytes();

        let key = self
            .provider
            .get_or_create(&vault, &settings.key_name, settings.key_spec)
            .await?;
        let codec = EnvelopeCodec::with_options(self.provider.clone(), settings.codec_options());
        let direct = KeyResolver::direct(self.provider.clone());
        let rotated = KeyResolver::rotated(self.provider.clone(), backup_vault.clone());

        let primary_client =
            EncryptedBlobClient::new(Arc::clone(&self.primary), codec.clone(), direct);
        let backup_client = EncryptedBlobClient::new(Arc::clone(&self.backup), codec, rotated.clone());

        let blob_name = format!("{}.txt", uuid::Uuid::new_v4());
        let source = BlobLocation::new(
            &settings.storage_account,
            &settings.container_name,
            &blob_name,
        );
        let metadata = primary_client
            .upload(
                &source,
                &key,
                settings.wrap_algorithm,
                &mut plaintext.as_slice(),
                BlobMetadata::new(),
                cancel,
            )
            .await?;
        let mut verified = Vec::with_capacity(3);

        let within = RekeyCopier::within(Arc::clone(&self.primary), settings.copy_options());
        let copy = source.in_container(&settings.copy_container_name);

        check_cancelled(cancel)?;
        let handle = within.copy_same_account(&source, &copy).await?;
        within.wait_for_copy_completion(&handle, timeout, cancel).await?;
        verify(&primary_client, &copy, &plaintext, cancel).await?;
        verified.push(copy.clone());

        check_cancelled(cancel)?;
        let handle = within.copy_with_rekey(&source, &copy, &backup_vault).await?;
        within.wait_for_copy_completion(&handle, timeout, cancel).await?;
        verify(&primary_client.with_resolver(rotated), &copy, &plaintext, cancel).await?;
        verified.push(copy);

        check_cancelled(cancel)?;
        let across = RekeyCopier::new(
            Arc::clone(&self.primary),
            Arc::clone(&self.backup),
            settings.copy_options(),
        );
        let other = BlobLocation::new(
            &settings.storage_account_backup,
            &settings.other_container_name,
            &blob_name,
        );
        let handle = across.copy_cross_account(&source, &other, &backup_vault).await?;
        across.wait_for_copy_completion(&handle, timeout, cancel).await?;
        verify(&backup_client, &other, &plaintext, cancel).await?;
        verified.push(other);

        info!(%source, copies = verified.len(), "rotation scenario complete");
        Ok(ScenarioReport {
            source,
            plaintext,
            metadata,
            verified,
        })
    }
}

async fn verify(
    client: &EncryptedBlobClient,
    location: &BlobLocation,
    expected: &[u8],
    cancel: &CancelSignal,
) -> Result<()> {
    let downloaded = client.download_to_vec(location, cancel).await?;
    if downloaded != expected {
        return Err(EnvelopeError::IntegrityMismatch {
            location: location.to_string(),
        });
    }
    info!(%location, "copy content verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_is_37_bytes() {
        let message = RotationScenario::default_message();
        assert!(message.starts_with("Hello - "));
        assert_eq!(message.len(), 37);
    }
}
