//! Curve25519 public-key authenticated encryption (NaCl box).
//!
//! Sealed form is `nonce(24) || ciphertext || mac` with a random nonce. The
//! box is always precomputed from the two key halves, which is what the
//! envelope layer wants: one sender secret against one recipient public key.

use crypto_box::aead::Aead;
use crypto_box::SalsaBox;

use crate::{key32, nonce24, CryptoError, Result, SecretBytes, MAC_SIZE, NONCE_SIZE};

/// Curve25519 keypair for box operations.
pub struct BoxKeypair {
    pub public: [u8; 32],
    pub secret: SecretBytes<32>,
}

impl BoxKeypair {
    pub fn generate() -> Self {
        let secret = crypto_box::SecretKey::generate(&mut rand::rngs::OsRng);
        BoxKeypair {
            public: *secret.public_key().as_bytes(),
            secret: SecretBytes::new(secret.to_bytes()),
        }
    }

    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let sk = crypto_box::SecretKey::from(key32(secret)?);
        Ok(BoxKeypair {
            public: *sk.public_key().as_bytes(),
            secret: SecretBytes::new(sk.to_bytes()),
        })
    }
}

fn precompute(secret: &SecretBytes<32>, remote_public: &[u8]) -> Result<SalsaBox> {
    let sk = crypto_box::SecretKey::from(*secret.expose());
    let pk = crypto_box::PublicKey::from(key32(remote_public)?);
    Ok(SalsaBox::new(&pk, &sk))
}

/// Seal `msg` from `secret` to `remote_public`.
pub fn seal(secret: &SecretBytes<32>, remote_public: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let sbox = precompute(secret, remote_public)?;
    let nonce: [u8; 24] = crate::random_array();
    let ct = sbox
        .encrypt(&nonce.into(), msg)
        .map_err(|_| CryptoError::CryptoFailure)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open a sealed box produced by the remote side.
pub fn open(secret: &SecretBytes<32>, remote_public: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + MAC_SIZE {
        return Err(CryptoError::CryptoFailure);
    }
    let sbox = precompute(secret, remote_public)?;
    let nonce = nonce24(&sealed[..NONCE_SIZE])?;
    sbox.decrypt(&nonce.into(), &sealed[NONCE_SIZE..])
        .map_err(|_| CryptoError::CryptoFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_between_two_pairs() {
        let alice = BoxKeypair::generate();
        let bob = BoxKeypair::generate();
        let sealed = seal(&alice.secret, &bob.public, b"across the wire").unwrap();
        let opened = open(&bob.secret, &alice.public, &sealed).unwrap();
        assert_eq!(opened, b"across the wire");
    }

    #[test]
    fn tamper_any_byte_fails() {
        let alice = BoxKeypair::generate();
        let bob = BoxKeypair::generate();
        let sealed = seal(&alice.secret, &bob.public, b"payload").unwrap();
        for i in 0..sealed.len() {
            let mut bad = sealed.clone();
            bad[i] ^= 0x01;
            assert!(
                open(&bob.secret, &alice.public, &bad).is_err(),
                "byte {} tamper must fail",
                i
            );
        }
    }

    #[test]
    fn wrong_recipient_fails() {
        let alice = BoxKeypair::generate();
        let bob = BoxKeypair::generate();
        let eve = BoxKeypair::generate();
        let sealed = seal(&alice.secret, &bob.public, b"payload").unwrap();
        assert!(open(&eve.secret, &alice.public, &sealed).is_err());
    }

    #[test]
    fn truncated_input_is_failure() {
        let alice = BoxKeypair::generate();
        let bob = BoxKeypair::generate();
        assert!(open(&bob.secret, &alice.public, &[0u8; 10]).is_err());
    }
}
