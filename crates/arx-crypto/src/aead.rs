//! XChaCha20-Poly1305-IETF AEAD.
//!
//! Two shapes: the attached form (`nonce || ct || tag`, random nonce) used by
//! the secret store, and a detached-nonce form for the block store and the
//! replication channel, where nonces are derived deterministically and never
//! travel with the ciphertext.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;

use crate::{nonce24, CryptoError, Result, MAC_SIZE, NONCE_SIZE};

fn cipher(key: &[u8]) -> Result<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))
}

/// Seal with a random nonce; output `nonce(24) || ct || tag`.
pub fn seal(key: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let nonce: [u8; 24] = crate::random_array();
    let ct = seal_detached(key, &nonce, aad, msg)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open the attached form produced by [`seal`].
pub fn open(key: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + MAC_SIZE {
        return Err(CryptoError::CryptoFailure);
    }
    let nonce = nonce24(&sealed[..NONCE_SIZE])?;
    open_detached(key, &nonce, aad, &sealed[NONCE_SIZE..])
}

/// Seal under a caller-supplied nonce; output `ct || tag` only.
pub fn seal_detached(key: &[u8], nonce: &[u8; 24], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    cipher(key)?
        .encrypt(nonce.into(), Payload { msg, aad })
        .map_err(|_| CryptoError::CryptoFailure)
}

/// Open the detached-nonce form.
pub fn open_detached(key: &[u8], nonce: &[u8; 24], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>> {
    cipher(key)?
        .decrypt(nonce.into(), Payload { msg: ct, aad })
        .map_err(|_| CryptoError::CryptoFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_roundtrip() {
        let key = crate::random(32);
        let sealed = seal(&key, b"aad", b"payload").unwrap();
        assert_eq!(open(&key, b"aad", &sealed).unwrap(), b"payload");
    }

    #[test]
    fn aad_is_bound() {
        let key = crate::random(32);
        let sealed = seal(&key, b"aad", b"payload").unwrap();
        assert!(open(&key, b"other", &sealed).is_err());
    }

    #[test]
    fn detached_roundtrip() {
        let key = crate::random(32);
        let nonce = [9u8; 24];
        let ct = seal_detached(&key, &nonce, b"", b"block").unwrap();
        assert_eq!(ct.len(), 5 + MAC_SIZE);
        assert_eq!(open_detached(&key, &nonce, b"", &ct).unwrap(), b"block");
    }

    #[test]
    fn detached_wrong_nonce_fails() {
        let key = crate::random(32);
        let ct = seal_detached(&key, &[1u8; 24], b"", b"block").unwrap();
        assert!(open_detached(&key, &[2u8; 24], b"", &ct).is_err());
    }
}
