//! XSalsa20-Poly1305 secretbox. Sealed form is `nonce(24) || ct || mac`.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;

use crate::{nonce24, CryptoError, Result, MAC_SIZE, NONCE_SIZE};

fn cipher(key: &[u8]) -> Result<XSalsa20Poly1305> {
    XSalsa20Poly1305::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))
}

/// Seal `msg` under a 32-byte key with a random nonce.
pub fn seal(key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    let nonce: [u8; 24] = crate::random_array();
    let ct = cipher
        .encrypt(&nonce.into(), msg)
        .map_err(|_| CryptoError::CryptoFailure)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open a secretbox sealed with [`seal`].
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + MAC_SIZE {
        return Err(CryptoError::CryptoFailure);
    }
    let cipher = cipher(key)?;
    let nonce = nonce24(&sealed[..NONCE_SIZE])?;
    cipher
        .decrypt(&nonce.into(), &sealed[NONCE_SIZE..])
        .map_err(|_| CryptoError::CryptoFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = crate::random(32);
        let sealed = seal(&key, b"at rest").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"at rest");
    }

    #[test]
    fn nonces_are_fresh() {
        let key = crate::random(32);
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_length_is_programmer_error() {
        assert!(matches!(
            seal(&[0u8; 16], b"x"),
            Err(CryptoError::KeyLength(16))
        ));
    }

    #[test]
    fn tamper_fails() {
        let key = crate::random(32);
        let mut sealed = seal(&key, b"at rest").unwrap();
        sealed[30] ^= 0x40;
        assert!(matches!(
            open(&key, &sealed),
            Err(CryptoError::CryptoFailure)
        ));
    }
}
