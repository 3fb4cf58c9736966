//! BLAKE2b generic hashing.

use crate::{CryptoError, Result};

/// Minimum digest length accepted by [`generichash`].
pub const HASH_MIN: usize = 16;
/// Maximum digest and key length.
pub const HASH_MAX: usize = 64;

/// Keyed or unkeyed BLAKE2b over `data`.
///
/// `digest_len` must be within `16..=64`, the optional key within `0..=64`
/// bytes; anything else is a programmer error.
pub fn generichash(key: Option<&[u8]>, digest_len: usize, data: &[u8]) -> Result<Vec<u8>> {
    if !(HASH_MIN..=HASH_MAX).contains(&digest_len) {
        return Err(CryptoError::HashLength(digest_len));
    }
    let mut params = blake2b_simd::Params::new();
    params.hash_length(digest_len);
    if let Some(k) = key {
        if k.len() > HASH_MAX {
            return Err(CryptoError::KeyLength(k.len()));
        }
        params.key(k);
    }
    Ok(params.hash(data).as_bytes().to_vec())
}

/// Default 64-byte unkeyed digest, as stored in archive entry records.
pub fn digest64(data: &[u8]) -> [u8; 64] {
    let hash = blake2b_simd::Params::new().hash_length(64).hash(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// 24-byte keyed digest, the per-block nonce construction of the stream
/// store: `BLAKE2b(u64_le(block_index), key = nonce_key, 24)`.
pub fn block_nonce(nonce_key: &[u8; 32], block_index: u64) -> [u8; 24] {
    let hash = blake2b_simd::Params::new()
        .hash_length(24)
        .key(nonce_key)
        .hash(&block_index.to_le_bytes());
    let mut out = [0u8; 24];
    out.copy_from_slice(hash.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_length_bounds() {
        assert!(matches!(
            generichash(None, 15, b"x"),
            Err(CryptoError::HashLength(15))
        ));
        assert!(matches!(
            generichash(None, 65, b"x"),
            Err(CryptoError::HashLength(65))
        ));
        assert_eq!(generichash(None, 16, b"x").unwrap().len(), 16);
        assert_eq!(generichash(None, 64, b"x").unwrap().len(), 64);
    }

    #[test]
    fn keyed_differs_from_unkeyed() {
        let plain = generichash(None, 32, b"data").unwrap();
        let keyed = generichash(Some(b"key"), 32, b"data").unwrap();
        assert_ne!(plain, keyed);
    }

    #[test]
    fn oversized_key_rejected() {
        let key = [0u8; 65];
        assert!(matches!(
            generichash(Some(&key), 32, b"data"),
            Err(CryptoError::KeyLength(65))
        ));
    }

    #[test]
    fn block_nonce_unique_per_index() {
        let key = [7u8; 32];
        assert_ne!(block_nonce(&key, 0), block_nonce(&key, 1));
        assert_eq!(block_nonce(&key, 3), block_nonce(&key, 3));
    }

    #[test]
    fn digest64_matches_generichash() {
        let a = digest64(b"hello");
        let b = generichash(None, 64, b"hello").unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }
}
