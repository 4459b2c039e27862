//! Per-object content key material.
//!
//! Each object gets a random 256-bit DEK and a random 96-bit base nonce.
//! Both are held in a [`ContentKey`] that zeroizes on drop.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::types::{AES_GCM_NONCE_LENGTH, AES_KEY_LENGTH};

/// Generate a random 256-bit Data Encryption Key.
pub fn generate_dek() -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    let mut dek = [0u8; AES_KEY_LENGTH];
    getrandom::getrandom(&mut dek).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(dek)
}

/// Generate a random 12-byte base nonce for the region cipher.
pub fn generate_iv() -> Result<[u8; AES_GCM_NONCE_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_NONCE_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// A DEK together with the base nonce it is used with.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    dek: [u8; AES_KEY_LENGTH],
    iv: [u8; AES_GCM_NONCE_LENGTH],
}

impl ContentKey {
    /// Fresh random DEK and IV.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            dek: generate_dek()?,
            iv: generate_iv()?,
        })
    }

    /// Rebuild a content key from an unwrapped DEK and the stored IV.
    pub fn from_parts(dek: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let dek: [u8; AES_KEY_LENGTH] =
            dek.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: AES_KEY_LENGTH,
                got: dek.len(),
            })?;
        let iv: [u8; AES_GCM_NONCE_LENGTH] =
            iv.try_into().map_err(|_| CryptoError::InvalidNonceLength {
                expected: AES_GCM_NONCE_LENGTH,
                got: iv.len(),
            })?;
        Ok(Self { dek, iv })
    }

    pub fn dek(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.dek
    }

    pub fn iv(&self) -> &[u8; AES_GCM_NONCE_LENGTH] {
        &self.iv
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("dek", &"[REDACTED]")
            .field("iv", &self.iv)
            .finish()
    }
}
