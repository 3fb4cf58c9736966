//! Fixed cryptographic primitive set for arx.
//!
//! Every archive block, document signature and wire frame in the system is
//! bound to the primitives in this crate: Curve25519 box, XSalsa20-Poly1305
//! secretbox, Ed25519 signatures, XChaCha20-Poly1305 AEAD, BLAKE2b hashing
//! and a BLAKE2b-chained KDF. Sizes are frozen constants; a caller handing a
//! wrongly sized key or nonce gets [`CryptoError::KeyLength`] /
//! [`CryptoError::NonceLength`], which are programmer errors and never
//! retried. Verification and decryption failures on user input surface as
//! [`CryptoError::CryptoFailure`] and are recoverable.

mod error;
mod secret;

pub mod aead;
pub mod box_;
pub mod hash;
pub mod kdf;
pub mod kx;
pub mod secretbox;
pub mod sign;
pub mod store;

pub use error::CryptoError;
pub use secret::SecretBytes;
pub use store::{FileSecretStore, MemorySecretStore, SecretStore};

use rand::RngCore;

/// Result alias for this crate.
pub type Result<T, E = CryptoError> = std::result::Result<T, E>;

/// Curve25519 public/secret key size.
pub const KEY_SIZE: usize = 32;
/// XSalsa20/XChaCha20 nonce size.
pub const NONCE_SIZE: usize = 24;
/// Poly1305 authenticator size.
pub const MAC_SIZE: usize = 16;
/// Ed25519 seed size.
pub const SEED_SIZE: usize = 32;
/// Ed25519 expanded secret key size (seed || verify key).
pub const SIGN_SECRET_SIZE: usize = 64;
/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;
/// Default BLAKE2b digest size.
pub const HASH_SIZE: usize = 64;

/// Fill a fresh buffer with `n` bytes from the OS RNG.
pub fn random(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Fixed-size variant of [`random`].
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

pub(crate) fn key32(bytes: &[u8]) -> Result<[u8; 32]> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::KeyLength(bytes.len()))?;
    Ok(arr)
}

pub(crate) fn nonce24(bytes: &[u8]) -> Result<[u8; 24]> {
    let arr: [u8; 24] = bytes
        .try_into()
        .map_err(|_| CryptoError::NonceLength(bytes.len()))?;
    Ok(arr)
}
