//! EnvelopeCodec: streaming envelope encryption of one object.
//!
//! Encrypt: fresh ContentKey → DEK wrapped under the master key → payload
//! sealed region by region. Decrypt: agent check → key resolution → unwrap →
//! regions opened in order, each written out only after its tag verifies.
//!
//! Memory is bounded by one region in both directions. The stream reader
//! always looks one byte past the current region so the final region can be
//! flagged without knowing the total length up front.

use std::collections::BTreeMap;

use envelope_crypto::{
    ContentKey, CryptoError, RegionCipher, AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH,
    DEFAULT_REGION_LENGTH, MAX_REGION_LENGTH,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{EnvelopeError, Result};
use crate::kms::KeyHandle;
use crate::metadata::{
    EncryptedRegionInfo, EncryptionAgent, EncryptionMetadata, WrappedContentKey,
};
use crate::provider::MasterKeyProvider;
use crate::resolver::KeyResolver;
use crate::types::{check_cancelled, CancelSignal, WrapAlgorithm};

/// `KeyWrappingMetadata` entry naming the producer of an object.
pub const ENCRYPTION_LIBRARY_KEY: &str = "EncryptionLibrary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Plaintext bytes per sealed region.
    pub region_length: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            region_length: DEFAULT_REGION_LENGTH,
        }
    }
}

#[derive(Clone)]
pub struct EnvelopeCodec {
    provider: MasterKeyProvider,
    options: CodecOptions,
}

impl EnvelopeCodec {
    pub fn new(provider: MasterKeyProvider) -> Self {
        Self::with_options(provider, CodecOptions::default())
    }

    pub fn with_options(provider: MasterKeyProvider, options: CodecOptions) -> Self {
        Self { provider, options }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Generate a fresh content key and wrap it under `key`.
    ///
    /// The returned metadata is final: the payload has not been touched yet,
    /// but nothing in the record depends on it.
    pub async fn seal_content_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
    ) -> Result<(ContentKey, EncryptionMetadata)> {
        let region_length = self.options.region_length;
        if region_length == 0 || region_length > MAX_REGION_LENGTH {
            return Err(EnvelopeError::CryptoOperationFailed(format!(
                "region length {} outside 1..={}",
                region_length, MAX_REGION_LENGTH
            )));
        }
        key.id.check()?;
        let content_key = ContentKey::generate().map_err(crypto_failure)?;
        let encrypted_key = self
            .provider
            .wrap(key, algorithm, content_key.dek())
            .await?;

        let metadata = EncryptionMetadata {
            wrapped_content_key: WrappedContentKey {
                key_id: key.id.to_string(),
                encrypted_key,
                algorithm: algorithm.to_string(),
            },
            encryption_agent: EncryptionAgent::current(),
            encrypted_region_info: EncryptedRegionInfo {
                data_length: self.options.region_length,
                nonce_length: AES_GCM_NONCE_LENGTH,
            },
            content_encryption_iv: content_key.iv().to_vec(),
            key_wrapping_metadata: BTreeMap::from([(
                ENCRYPTION_LIBRARY_KEY.to_string(),
                format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            )]),
        };
        debug!(key = %key.id, %algorithm, "sealed content key");
        Ok((content_key, metadata))
    }

    /// Encrypt `reader` into `writer` with an already sealed content key.
    ///
    /// Returns the number of ciphertext bytes written. The writer is flushed
    /// but not shut down.
    pub async fn encrypt_with<R, W>(
        &self,
        content_key: &ContentKey,
        metadata: &EncryptionMetadata,
        reader: &mut R,
        writer: &mut W,
        cancel: &CancelSignal,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let region_length = metadata.encrypted_region_info.data_length;
        let cipher = RegionCipher::new(content_key, region_length).map_err(crypto_failure)?;

        let mut buf = Vec::with_capacity(region_length + 1);
        let mut index = 0u64;
        let mut written = 0u64;
        loop {
            check_cancelled(cancel)?;
            fill(reader, &mut buf, region_length + 1).await?;
            let is_final = buf.len() <= region_length;
            let take = buf.len().min(region_length);

            let sealed = cipher
                .seal(index, is_final, &buf[..take])
                .map_err(crypto_failure)?;
            writer.write_all(&sealed).await?;
            written += sealed.len() as u64;
            buf.drain(..take);

            if is_final {
                break;
            }
            index += 1;
        }
        writer.flush().await?;
        debug!(regions = index + 1, bytes = written, "encrypted payload");
        Ok(written)
    }

    /// Encrypt `reader` into `writer` under `key`, returning the metadata to
    /// store next to the ciphertext.
    pub async fn encrypt<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        cancel: &CancelSignal,
    ) -> Result<EncryptionMetadata>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        check_cancelled(cancel)?;
        let (content_key, metadata) = self.seal_content_key(key, algorithm).await?;
        self.encrypt_with(&content_key, &metadata, reader, writer, cancel)
            .await?;
        Ok(metadata)
    }

    /// Decrypt `reader` into `writer` using `metadata`, resolving the master
    /// key through `resolver`. Returns the number of plaintext bytes written.
    pub async fn decrypt<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        metadata: &EncryptionMetadata,
        resolver: &KeyResolver,
        cancel: &CancelSignal,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        metadata.check_agent()?;
        check_region_info(metadata)?;
        let algorithm: WrapAlgorithm = metadata.wrapped_content_key.algorithm.parse()?;
        let key_id = metadata.key_identifier()?;
        check_cancelled(cancel)?;

        let key = resolver.resolve(&key_id).await?;
        let dek = resolver
            .provider()
            .unwrap(&key, algorithm, &metadata.wrapped_content_key.encrypted_key)
            .await?;
        let content_key = ContentKey::from_parts(&dek, &metadata.content_encryption_iv)
            .map_err(decryption_failure)?;
        drop(dek);

        let region_length = metadata.encrypted_region_info.data_length;
        let cipher = RegionCipher::new(&content_key, region_length).map_err(decryption_failure)?;
        let sealed_region_length = cipher.sealed_region_length();

        let mut buf = Vec::with_capacity(sealed_region_length + 1);
        let mut index = 0u64;
        let mut written = 0u64;
        loop {
            check_cancelled(cancel)?;
            fill(reader, &mut buf, sealed_region_length + 1).await?;
            let is_final = buf.len() <= sealed_region_length;
            let take = buf.len().min(sealed_region_length);
            if is_final && take < AES_GCM_TAG_LENGTH {
                return Err(decryption_failure(CryptoError::Truncated));
            }

            let plaintext = cipher
                .open(index, is_final, &buf[..take])
                .map_err(decryption_failure)?;
            writer.write_all(&plaintext).await?;
            written += plaintext.len() as u64;
            buf.drain(..take);

            if is_final {
                break;
            }
            index += 1;
        }
        writer.flush().await?;
        debug!(key = %key.id, regions = index + 1, bytes = written, "decrypted payload");
        Ok(written)
    }
}

fn check_region_info(metadata: &EncryptionMetadata) -> Result<()> {
    let info = &metadata.encrypted_region_info;
    if info.data_length == 0 || info.data_length > MAX_REGION_LENGTH {
        return Err(EnvelopeError::InvalidMetadata(format!(
            "region length {} outside 1..={}",
            info.data_length, MAX_REGION_LENGTH
        )));
    }
    if info.nonce_length != AES_GCM_NONCE_LENGTH
        || metadata.content_encryption_iv.len() != AES_GCM_NONCE_LENGTH
    {
        return Err(EnvelopeError::InvalidMetadata(format!(
            "expected a {}-byte content IV, got {}",
            AES_GCM_NONCE_LENGTH,
            metadata.content_encryption_iv.len()
        )));
    }
    Ok(())
}

/// Read until `buf` holds `target` bytes or the reader is exhausted.
async fn fill<R>(reader: &mut R, buf: &mut Vec<u8>, target: usize) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    while buf.len() < target {
        let start = buf.len();
        buf.resize(target, 0);
        let n = reader.read(&mut buf[start..]).await;
        match n {
            Ok(0) => {
                buf.truncate(start);
                break;
            }
            Ok(n) => buf.truncate(start + n),
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn crypto_failure(err: CryptoError) -> EnvelopeError {
    EnvelopeError::CryptoOperationFailed(err.to_string())
}

fn decryption_failure(err: CryptoError) -> EnvelopeError {
    EnvelopeError::DecryptionFailed(err.to_string())
}
