/// AES key length in bytes (256 bits). Every DEK has this length.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_NONCE_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits). Appended to every sealed region.
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// Default plaintext region length: 4 MiB.
pub const DEFAULT_REGION_LENGTH: usize = 4 * 1024 * 1024;

/// Largest accepted plaintext region length: 64 MiB. Bounds the buffer a
/// reader allocates for one region.
pub const MAX_REGION_LENGTH: usize = 64 * 1024 * 1024;

/// Uncompressed SEC1 P-256 point: 0x04 || x(32) || y(32).
pub const P256_POINT_LENGTH: usize = 65;

/// AES-KW output size for a 32-byte key: 32 + 8 = 40 bytes.
pub const AES_KW_OUTPUT_LENGTH: usize = 40;

/// Wrapped DEK wire format: [ephemeral public key:65][AES-KW(KEK, DEK):40].
pub const WRAPPED_KEY_LENGTH: usize = P256_POINT_LENGTH + AES_KW_OUTPUT_LENGTH;
