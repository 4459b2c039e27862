//! ECDH-ES+A256KW key wrapping over P-256.
//!
//! The sender generates an ephemeral P-256 keypair, agrees a shared secret
//! with the recipient's public key, derives a 256-bit KEK with Concat KDF
//! (NIST SP 800-56A §5.8.1) and wraps the DEK with AES-KW (RFC 3394).
//!
//! Wrapped key wire format: [ephemeral public key, SEC1 uncompressed:65][AES-KW(KEK, DEK):40]
//!
//! AES-KW carries an integrity check, so unwrapping with the wrong private key
//! or tampered bytes fails instead of producing a wrong DEK.

use aes_kw::Kek;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::types::{AES_KEY_LENGTH, AES_KW_OUTPUT_LENGTH, P256_POINT_LENGTH, WRAPPED_KEY_LENGTH};

/// Algorithm identifier used in the KDF and in object metadata.
pub const ECDH_ES_A256KW: &str = "ECDH-ES+A256KW";

/// Generate a new P-256 master keypair.
pub fn generate_master_key() -> SecretKey {
    SecretKey::random(&mut p256::elliptic_curve::rand_core::OsRng)
}

/// Wrap a 32-byte DEK for the holder of `recipient`'s private key.
pub fn wrap_key(recipient: &PublicKey, dek: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if dek.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: dek.len(),
        });
    }

    let ephemeral_secret = EphemeralSecret::random(&mut p256::elliptic_curve::rand_core::OsRng);
    let ephemeral_point = p256::PublicKey::from(&ephemeral_secret).to_encoded_point(false);

    let shared_secret = ephemeral_secret.diffie_hellman(recipient);
    let mut kek_bytes = concat_kdf(shared_secret.raw_secret_bytes().as_slice(), ECDH_ES_A256KW, 256);
    let kek = Kek::from(kek_bytes);
    kek_bytes.zeroize();

    let mut wrapped = [0u8; AES_KW_OUTPUT_LENGTH];
    kek.wrap(dek, &mut wrapped)
        .map_err(|e| CryptoError::WrapFailed(format!("{:?}", e)))?;

    let mut result = Vec::with_capacity(WRAPPED_KEY_LENGTH);
    result.extend_from_slice(ephemeral_point.as_bytes());
    result.extend_from_slice(&wrapped);
    Ok(result)
}

/// Unwrap a DEK produced by [`wrap_key`] using the recipient's private key.
pub fn unwrap_key(recipient: &SecretKey, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_LENGTH {
        return Err(CryptoError::InvalidWrappedKeyLength {
            expected: WRAPPED_KEY_LENGTH,
            got: wrapped.len(),
        });
    }

    let (point_bytes, wrapped_dek) = wrapped.split_at(P256_POINT_LENGTH);
    let point = EncodedPoint::from_bytes(point_bytes)
        .map_err(|e| CryptoError::InvalidPublicKey(format!("invalid EC point: {}", e)))?;
    let sender_public_key = PublicKey::from_encoded_point(&point)
        .into_option()
        .ok_or_else(|| CryptoError::InvalidPublicKey("EC point not on P-256 curve".to_string()))?;

    let shared_secret = p256::ecdh::diffie_hellman(
        recipient.to_nonzero_scalar(),
        sender_public_key.as_affine(),
    );
    let mut kek_bytes = concat_kdf(shared_secret.raw_secret_bytes().as_slice(), ECDH_ES_A256KW, 256);
    let kek = Kek::from(kek_bytes);
    kek_bytes.zeroize();

    let mut dek = Zeroizing::new(vec![0u8; AES_KEY_LENGTH]);
    kek.unwrap(wrapped_dek, &mut dek)
        .map_err(|e| CryptoError::UnwrapFailed(format!("{:?}", e)))?;
    Ok(dek)
}

/// Concat KDF (NIST SP 800-56A, single-pass for <=256 bits).
///
///   SHA-256(00000001 || Z || algID || partyUInfo || partyVInfo || suppPubInfo)
///
/// PartyUInfo and PartyVInfo are empty.
fn concat_kdf(z: &[u8], alg: &str, key_data_len_bits: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    hasher.update((alg.len() as u32).to_be_bytes());
    hasher.update(alg.as_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(key_data_len_bits.to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
