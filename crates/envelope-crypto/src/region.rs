//! Region-chunked AES-256-GCM.
//!
//! A payload is split into fixed-size plaintext regions, each sealed
//! independently so that a stream can be processed with bounded memory.
//!
//! Region `i` is sealed under `nonce = iv XOR (i as u64 BE, right-aligned)`.
//! The associated data is a single byte: 1 for the final region, 0 otherwise,
//! so dropping trailing regions is detected on decrypt.
//!
//! Sealed region layout: [ciphertext][tag:16]

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::dek::ContentKey;
use crate::error::CryptoError;
use crate::types::{AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH, MAX_REGION_LENGTH};

const FINAL_REGION: [u8; 1] = [1];
const INNER_REGION: [u8; 1] = [0];

/// Seals and opens the regions of one object.
pub struct RegionCipher {
    cipher: Aes256Gcm,
    iv: [u8; AES_GCM_NONCE_LENGTH],
    region_length: usize,
    sealed_region_length: usize,
}

impl RegionCipher {
    /// Create a region cipher for a content key.
    ///
    /// # Arguments
    /// * `key` - DEK and base nonce of the object
    /// * `region_length` - Plaintext bytes per region, in `1..=MAX_REGION_LENGTH`
    pub fn new(key: &ContentKey, region_length: usize) -> Result<Self, CryptoError> {
        let sealed_region_length = region_length
            .checked_add(AES_GCM_TAG_LENGTH)
            .filter(|_| (1..=MAX_REGION_LENGTH).contains(&region_length))
            .ok_or(CryptoError::InvalidRegionLength(region_length))?;
        let cipher = Aes256Gcm::new_from_slice(key.dek())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self {
            cipher,
            iv: *key.iv(),
            region_length,
            sealed_region_length,
        })
    }

    /// Plaintext bytes per region.
    pub fn region_length(&self) -> usize {
        self.region_length
    }

    /// Sealed bytes per full region.
    pub fn sealed_region_length(&self) -> usize {
        self.sealed_region_length
    }

    /// Nonce for region `index`.
    fn region_nonce(&self, index: u64) -> [u8; AES_GCM_NONCE_LENGTH] {
        let mut nonce = self.iv;
        let counter = index.to_be_bytes();
        let offset = AES_GCM_NONCE_LENGTH - counter.len();
        for (i, b) in counter.iter().enumerate() {
            nonce[offset + i] ^= b;
        }
        nonce
    }

    /// Seal one plaintext region. Inner regions must be exactly `region_length`.
    pub fn seal(&self, index: u64, is_final: bool, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > self.region_length || (!is_final && plaintext.len() != self.region_length)
        {
            return Err(CryptoError::InvalidRegionLength(plaintext.len()));
        }
        let nonce = self.region_nonce(index);
        let aad: &[u8] = if is_final { &FINAL_REGION } else { &INNER_REGION };
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Open one sealed region, verifying its tag before returning any plaintext.
    pub fn open(&self, index: u64, is_final: bool, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < AES_GCM_TAG_LENGTH {
            return Err(CryptoError::Truncated);
        }
        if sealed.len() > self.sealed_region_length() {
            return Err(CryptoError::InvalidRegionLength(sealed.len()));
        }
        let nonce = self.region_nonce(index);
        let aad: &[u8] = if is_final { &FINAL_REGION } else { &INNER_REGION };
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: sealed, aad },
            )
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// Number of ciphertext bytes produced for a plaintext of `plaintext_length`.
pub fn sealed_length(plaintext_length: u64, region_length: usize) -> u64 {
    let region_length = region_length as u64;
    let regions = if plaintext_length == 0 {
        1
    } else {
        plaintext_length.div_ceil(region_length)
    };
    plaintext_length + regions * AES_GCM_TAG_LENGTH as u64
}
