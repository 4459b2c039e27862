//! Integration tests for rekey copies, cross-account copies and the full
//! rotation workflow.

use std::sync::Arc;
use std::time::Duration;

use keyvault_envelope::{
    cancellation, never_cancelled, BlobLocation, BlobMetadata, BlobStore, CodecOptions,
    CopyOptions, EncryptedBlobClient, EncryptionMetadata, EnvelopeCodec, EnvelopeError,
    InMemoryBlobService, InMemoryBlobStore, InMemoryKms, KeyHandle, KeyResolver, KeySpec,
    MasterKeyProvider, RekeyCopier, RotationScenario, Settings, VaultIdentity, WrapAlgorithm,
};

// ============================================================================
// Helpers
// ============================================================================

const PLAINTEXT: &[u8] = b"Hello - 2026-10-17T09:30:00.000+00:00";

struct World {
    kms: Arc<InMemoryKms>,
    provider: MasterKeyProvider,
    blobs: InMemoryBlobService,
    primary: InMemoryBlobStore,
    backup: InMemoryBlobStore,
    key: KeyHandle,
    source: BlobLocation,
}

fn vault_a() -> VaultIdentity {
    VaultIdentity::new("vault-a")
}

fn vault_b() -> VaultIdentity {
    VaultIdentity::new("vault-b")
}

fn copy_options() -> CopyOptions {
    CopyOptions {
        signed_reference_ttl: Duration::from_secs(60),
        poll_interval: Duration::from_millis(5),
    }
}

async fn world() -> World {
    let kms = Arc::new(InMemoryKms::new());
    let provider = MasterKeyProvider::new(kms.clone());
    let key = provider
        .get_or_create(&vault_a(), "k1", KeySpec::EcP256)
        .await
        .unwrap();
    let blobs = InMemoryBlobService::with_copy_latency(Duration::from_millis(10));
    let primary = blobs.account("primary");
    let backup = blobs.account("backup");

    let source = BlobLocation::new("primary", "tenant-y", "a.txt");
    client(&provider, &primary, KeyResolver::direct(provider.clone()))
        .upload(
            &source,
            &key,
            WrapAlgorithm::EcdhEsA256Kw,
            &mut &PLAINTEXT[..],
            BlobMetadata::new(),
            &never_cancelled(),
        )
        .await
        .unwrap();

    World {
        kms,
        provider,
        blobs,
        primary,
        backup,
        key,
        source,
    }
}

fn client(
    provider: &MasterKeyProvider,
    store: &InMemoryBlobStore,
    resolver: KeyResolver,
) -> EncryptedBlobClient {
    let codec = EnvelopeCodec::with_options(provider.clone(), CodecOptions { region_length: 16 });
    EncryptedBlobClient::new(Arc::new(store.clone()), codec, resolver)
}

impl World {
    fn within(&self) -> RekeyCopier {
        RekeyCopier::within(Arc::new(self.primary.clone()), copy_options())
    }

    fn across(&self, options: CopyOptions) -> RekeyCopier {
        RekeyCopier::new(
            Arc::new(self.primary.clone()),
            Arc::new(self.backup.clone()),
            options,
        )
    }

    fn rotated(&self) -> KeyResolver {
        KeyResolver::rotated(self.provider.clone(), vault_b())
    }

    async fn rekey_in_place(&self) -> BlobLocation {
        let copier = self.within();
        let destination = self.source.in_container("tenant-y-copy");
        let handle = copier
            .copy_with_rekey(&self.source, &destination, &vault_b())
            .await
            .unwrap();
        copier
            .wait_for_copy_completion(&handle, Duration::from_secs(5), &never_cancelled())
            .await
            .unwrap();
        destination
    }
}

// ============================================================================
// Same-account rekey
// ============================================================================

#[tokio::test]
async fn rekeyed_copy_reads_with_replicated_backup_key() {
    let w = world().await;
    w.kms.replicate_key(&vault_a(), &vault_b(), "k1").unwrap();
    let copy = w.rekey_in_place().await;

    let plaintext = client(&w.provider, &w.primary, w.rotated())
        .download_to_vec(&copy, &never_cancelled())
        .await
        .unwrap();
    assert_eq!(plaintext, PLAINTEXT);
    assert_eq!(w.primary.raw_bytes(&copy).unwrap(), w.primary.raw_bytes(&w.source).unwrap());
}

#[tokio::test]
async fn rekeyed_copy_with_distinct_backup_key_fails_decryption() {
    let w = world().await;
    // Same name, independently generated material.
    w.provider
        .get_or_create(&vault_b(), "k1", KeySpec::EcP256)
        .await
        .unwrap();
    let copy = w.rekey_in_place().await;

    let err = client(&w.provider, &w.primary, w.rotated())
        .download_to_vec(&copy, &never_cancelled())
        .await
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::DecryptionFailed(_)));
}

#[tokio::test]
async fn rekeyed_copy_without_backup_key_is_key_not_found() {
    let w = world().await;
    let copy = w.rekey_in_place().await;

    let err = client(&w.provider, &w.primary, w.rotated())
        .download_to_vec(&copy, &never_cancelled())
        .await
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::KeyNotFound { vault, name } if vault == "vault-b" && name == "k1"));
}

#[tokio::test]
async fn rekey_changes_only_the_vault_component() {
    let w = world().await;
    let copy = w.rekey_in_place().await;

    let original = EncryptionMetadata::from_blob_metadata(
        &w.primary.get_properties(&w.source).await.unwrap(),
    )
    .unwrap()
    .unwrap();
    let rekeyed =
        EncryptionMetadata::from_blob_metadata(&w.primary.get_properties(&copy).await.unwrap())
            .unwrap()
            .unwrap();

    assert_eq!(original.key_identifier().unwrap(), w.key.id);
    assert_eq!(rekeyed.key_identifier().unwrap(), w.key.id.with_vault(vault_b()));
    assert_eq!(
        rekeyed.wrapped_content_key.encrypted_key,
        original.wrapped_content_key.encrypted_key
    );
    assert_eq!(rekeyed.content_encryption_iv, original.content_encryption_iv);
}

// ============================================================================
// Cross-account copies
// ============================================================================

#[tokio::test]
async fn cross_account_copy_reads_from_backup_account() {
    let w = world().await;
    w.kms.replicate_key(&vault_a(), &vault_b(), "k1").unwrap();
    let copier = w.across(copy_options());
    let destination = BlobLocation::new("backup", "tenant-y-other", "a.txt");

    let handle = copier
        .copy_cross_account(&w.source, &destination, &vault_b())
        .await
        .unwrap();
    copier
        .wait_for_copy_completion(&handle, Duration::from_secs(5), &never_cancelled())
        .await
        .unwrap();

    let plaintext = client(&w.provider, &w.backup, w.rotated())
        .download_to_vec(&destination, &never_cancelled())
        .await
        .unwrap();
    assert_eq!(plaintext, PLAINTEXT);
}

#[tokio::test]
async fn expired_signed_reference_is_copy_expired() {
    let w = world().await;
    let reference = w
        .primary
        .mint_signed_read_reference(&w.source, Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let err = w
        .across(copy_options())
        .copy_cross_account_with_reference(
            reference,
            &BlobLocation::new("backup", "tenant-y-other", "a.txt"),
            &vault_b(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::CopyExpired { .. }));
    assert_eq!(w.backup.blob_count(), 0);
}

#[tokio::test]
async fn internal_reference_cannot_reach_another_account() {
    let w = world().await;
    let err = w
        .backup
        .copy_from_reference(
            keyvault_envelope::CopySource::Internal(w.source.clone()),
            &w.source.in_account("backup"),
            BlobMetadata::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        keyvault_envelope::StorageError::CrossAccountReference { .. }
    ));
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn cancelled_upload_leaves_no_object() {
    let w = world().await;
    let (tx, cancel) = cancellation();
    tx.send(true).unwrap();
    let location = BlobLocation::new("primary", "tenant-y", "cancelled.txt");

    let err = client(&w.provider, &w.primary, KeyResolver::direct(w.provider.clone()))
        .upload(
            &location,
            &w.key,
            WrapAlgorithm::EcdhEsA256Kw,
            &mut &PLAINTEXT[..],
            BlobMetadata::new(),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::Cancelled));
    assert!(w.primary.get_properties(&location).await.is_err());
}

// ============================================================================
// Full workflow
// ============================================================================

fn scenario_settings() -> Settings {
    Settings {
        storage_account: "primary".to_string(),
        storage_account_backup: "backup".to_string(),
        vault_name: "vault-a".to_string(),
        vault_name_backup: "vault-b".to_string(),
        key_name: "k1".to_string(),
        region_length: 16,
        copy_timeout_secs: 5,
        copy_poll_interval_ms: 5,
        ..Settings::default()
    }
}

#[tokio::test]
async fn rotation_scenario_verifies_every_copy() {
    let w = world().await;
    w.kms.replicate_key(&vault_a(), &vault_b(), "k1").unwrap();
    let scenario = RotationScenario::new(
        scenario_settings(),
        w.provider.clone(),
        Arc::new(w.primary.clone()),
        Arc::new(w.backup.clone()),
    );

    let report = scenario.run(None, &never_cancelled()).await.unwrap();
    assert_eq!(report.plaintext.len(), 37);
    assert_eq!(report.verified.len(), 3);
    assert_eq!(report.verified[0].container, "tenant-y-copy");
    assert_eq!(report.verified[2].account, "backup");
    assert_eq!(report.verified[2].container, "tenant-y-other");
    assert_eq!(report.metadata.key_identifier().unwrap(), w.key.id);
    // The existing key was reused, not recreated.
    assert_eq!(w.kms.create_calls(), 1);
    assert_eq!(w.blobs.account("backup").blob_count(), 1);
}

#[tokio::test]
async fn rotation_scenario_stops_when_backup_vault_lacks_the_key() {
    let w = world().await;
    let scenario = RotationScenario::new(
        scenario_settings(),
        w.provider.clone(),
        Arc::new(w.primary.clone()),
        Arc::new(w.backup.clone()),
    );

    let err = scenario
        .run(Some("rotate me".to_string()), &never_cancelled())
        .await
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::KeyNotFound { vault, .. } if vault == "vault-b"));
    assert_eq!(w.backup.blob_count(), 0);
}
