//! EncryptedBlobClient: encrypt-and-upload and download-and-decrypt.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::blob::BlobStore;
use crate::codec::EnvelopeCodec;
use crate::error::{EnvelopeError, Result};
use crate::kms::KeyHandle;
use crate::metadata::EncryptionMetadata;
use crate::resolver::KeyResolver;
use crate::types::{BlobLocation, BlobMetadata, CancelSignal, WrapAlgorithm};

/// Capacity of the in-process pipe between the encryptor and the upload.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A blob store client that encrypts on write and decrypts on read.
#[derive(Clone)]
pub struct EncryptedBlobClient {
    store: Arc<dyn BlobStore>,
    codec: EnvelopeCodec,
    resolver: KeyResolver,
}

impl EncryptedBlobClient {
    pub fn new(store: Arc<dyn BlobStore>, codec: EnvelopeCodec, resolver: KeyResolver) -> Self {
        Self {
            store,
            codec,
            resolver,
        }
    }

    /// The same client, resolving keys through `resolver` on download.
    pub fn with_resolver(&self, resolver: KeyResolver) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            resolver,
        }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Encrypt `plaintext` under `key` and store it at `location`.
    ///
    /// `metadata` is stored alongside with the `encryptiondata` entry added.
    /// The store receives the ciphertext as it is produced; if encryption
    /// fails or is cancelled the put is abandoned and nothing is stored.
    pub async fn upload<R>(
        &self,
        location: &BlobLocation,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        plaintext: &mut R,
        mut metadata: BlobMetadata,
        cancel: &CancelSignal,
    ) -> Result<EncryptionMetadata>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (content_key, encryption) = self.codec.seal_content_key(key, algorithm).await?;
        encryption.attach(&mut metadata)?;

        let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let encrypt = async {
            let written = self
                .codec
                .encrypt_with(&content_key, &encryption, plaintext, &mut writer, cancel)
                .await?;
            writer.shutdown().await?;
            Ok::<_, EnvelopeError>(written)
        };
        let put = async {
            self.store
                .put(location, Box::new(reader), metadata)
                .await
                .map_err(EnvelopeError::from)
        };
        let (written, ()) = tokio::try_join!(encrypt, put)?;

        info!(%location, key = %key.id, bytes = written, "uploaded encrypted blob");
        Ok(encryption)
    }

    /// Fetch the blob at `location` and write its plaintext to `writer`.
    ///
    /// Returns the number of plaintext bytes written.
    pub async fn download<W>(
        &self,
        location: &BlobLocation,
        writer: &mut W,
        cancel: &CancelSignal,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (mut body, metadata) = self.store.get(location).await?;
        let encryption = EncryptionMetadata::from_blob_metadata(&metadata)?
            .ok_or_else(|| EnvelopeError::MissingEncryptionData(location.to_string()))?;
        let written = self
            .codec
            .decrypt(&mut body, writer, &encryption, &self.resolver, cancel)
            .await?;
        info!(%location, bytes = written, "downloaded encrypted blob");
        Ok(written)
    }

    /// Download into memory.
    pub async fn download_to_vec(
        &self,
        location: &BlobLocation,
        cancel: &CancelSignal,
    ) -> Result<Vec<u8>> {
        let mut plaintext = Vec::new();
        self.download(location, &mut plaintext, cancel).await?;
        Ok(plaintext)
    }
}
