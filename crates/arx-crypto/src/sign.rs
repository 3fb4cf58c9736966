//! Ed25519 signing in the NaCl convention: `sign` produces `sig || msg`,
//! `verify` strips and checks the signature, returning the message.

use ed25519_dalek::{Signer as _, Verifier as _};

use crate::{CryptoError, Result, SecretBytes, SEED_SIZE, SIGNATURE_SIZE};

/// Ed25519 keypair: public verify key, expanded secret (`seed || verify`)
/// and the generating seed.
pub struct SignKeypair {
    pub verify: [u8; 32],
    pub secret: SecretBytes<64>,
    pub seed: SecretBytes<32>,
}

impl SignKeypair {
    /// Generate from the OS RNG.
    pub fn generate() -> Self {
        let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_signing_key(signing)
    }

    /// Rebuild from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() != SEED_SIZE {
            return Err(CryptoError::KeyLength(seed.len()));
        }
        let arr: [u8; 32] = seed.try_into().expect("length checked");
        Ok(Self::from_signing_key(ed25519_dalek::SigningKey::from_bytes(
            &arr,
        )))
    }

    /// Rebuild from the 64-byte expanded secret (`seed || verify`).
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        if secret.len() != 64 {
            return Err(CryptoError::KeyLength(secret.len()));
        }
        let pair = Self::from_seed(&secret[..32])?;
        // The embedded verify half must match the derived one.
        if pair.verify != secret[32..] {
            return Err(CryptoError::CryptoFailure);
        }
        Ok(pair)
    }

    fn from_signing_key(signing: ed25519_dalek::SigningKey) -> Self {
        let verify = signing.verifying_key().to_bytes();
        let seed = signing.to_bytes();
        let mut secret = [0u8; 64];
        secret[..32].copy_from_slice(&seed);
        secret[32..].copy_from_slice(&verify);
        SignKeypair {
            verify,
            secret: SecretBytes::new(secret),
            seed: SecretBytes::new(seed),
        }
    }
}

/// Sign `msg`, returning `sig || msg`.
pub fn sign(secret: &SecretBytes<64>, msg: &[u8]) -> Vec<u8> {
    let seed: [u8; 32] = secret.expose()[..32].try_into().expect("64-byte secret");
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    let sig = signing.sign(msg);
    let mut out = Vec::with_capacity(SIGNATURE_SIZE + msg.len());
    out.extend_from_slice(&sig.to_bytes());
    out.extend_from_slice(msg);
    out
}

/// Detached signature over `msg`.
pub fn sign_detached(secret: &SecretBytes<64>, msg: &[u8]) -> [u8; 64] {
    let seed: [u8; 32] = secret.expose()[..32].try_into().expect("64-byte secret");
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    signing.sign(msg).to_bytes()
}

/// Verify `sig || msg` against `verify_key`, returning the message slice.
pub fn verify<'a>(verify_key: &[u8], signed: &'a [u8]) -> Result<&'a [u8]> {
    if signed.len() < SIGNATURE_SIZE {
        return Err(CryptoError::CryptoFailure);
    }
    let (sig, msg) = signed.split_at(SIGNATURE_SIZE);
    verify_detached(verify_key, sig, msg)?;
    Ok(msg)
}

/// Verify a detached signature.
pub fn verify_detached(verify_key: &[u8], sig: &[u8], msg: &[u8]) -> Result<()> {
    let vk_arr: [u8; 32] = verify_key
        .try_into()
        .map_err(|_| CryptoError::KeyLength(verify_key.len()))?;
    let vk = ed25519_dalek::VerifyingKey::from_bytes(&vk_arr)
        .map_err(|_| CryptoError::CryptoFailure)?;
    let sig = ed25519_dalek::Signature::from_slice(sig).map_err(|_| CryptoError::CryptoFailure)?;
    vk.verify(msg, &sig).map_err(|_| CryptoError::CryptoFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let pair = SignKeypair::generate();
        let signed = sign(&pair.secret, b"statement of fact");
        let msg = verify(&pair.verify, &signed).unwrap();
        assert_eq!(msg, b"statement of fact");
    }

    #[test]
    fn tampered_message_fails() {
        let pair = SignKeypair::generate();
        let mut signed = sign(&pair.secret, b"statement of fact");
        let last = signed.len() - 1;
        signed[last] ^= 0x01;
        assert!(matches!(
            verify(&pair.verify, &signed),
            Err(CryptoError::CryptoFailure)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let pair = SignKeypair::generate();
        let other = SignKeypair::generate();
        let signed = sign(&pair.secret, b"msg");
        assert!(verify(&other.verify, &signed).is_err());
    }

    #[test]
    fn seed_roundtrip_reproduces_keys() {
        let pair = SignKeypair::generate();
        let again = SignKeypair::from_seed(pair.seed.expose()).unwrap();
        assert_eq!(pair.verify, again.verify);
        assert_eq!(pair.secret, again.secret);
    }

    #[test]
    fn from_secret_rejects_mismatched_halves() {
        let pair = SignKeypair::generate();
        let mut secret = *pair.secret.expose();
        secret[40] ^= 0xFF;
        assert!(SignKeypair::from_secret(&secret).is_err());
    }

    #[test]
    fn short_signed_blob_is_failure_not_panic() {
        let pair = SignKeypair::generate();
        assert!(verify(&pair.verify, b"short").is_err());
    }
}
