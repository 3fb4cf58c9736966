//! Key documents: the public half published in a portfolio and the private
//! half kept only in the owner's vault.

use crate::document::Document;
use crate::error::{DocError, Result};
use crate::field::{self, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;

use arx_crypto::sign::{verify_detached, SignKeypair};
use arx_crypto::SecretBytes;

/// Published keys: Curve25519 `public` for sealing, Ed25519 `verify` for
/// signatures. A rotation document carries two signatures: one chaining to
/// the previous key set and one by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub stamp: Stamp,
    pub public: Vec<u8>,
    pub verify: Vec<u8>,
}

impl Document for Keys {
    const KIND: DocKind = DocKind::Keys;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put(tag::PUBLIC, &self.public);
        w.put(tag::VERIFY, &self.verify);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::PUBLIC,
            tag::VERIFY,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Keys {
            stamp: Stamp::from_fields(map)?,
            public: field::blob(map.one(tag::PUBLIC)?, 32)?,
            verify: field::blob(map.one(tag::VERIFY)?, 32)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("keys-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("keys-public-size", self.public.len() == 32, "public key size")?;
        check_that("keys-verify-size", self.verify.len() == 32, "verify key size")?;
        check_that(
            "keys-signed",
            !self.stamp.signatures.is_empty() && self.stamp.signatures.len() <= 2,
            "keys carry one or two signatures",
        )?;
        Ok(())
    }
}

impl Keys {
    /// Does any of the signatures verify under this document's own verify
    /// key? Rotation requires the self-signature.
    pub fn verify_self(&self) -> Result<()> {
        let signable = self.signable();
        for sig in &self.stamp.signatures {
            if verify_detached(&self.verify, sig, &signable).is_ok() {
                return Ok(());
            }
        }
        Err(DocError::Crypto(arx_crypto::CryptoError::CryptoFailure))
    }

    /// Does any signature chain to `previous_verify` (the key set being
    /// rotated away from, or this same set for the initial issue)?
    pub fn verify_chained(&self, previous_verify: &[u8]) -> Result<()> {
        let signable = self.signable();
        for sig in &self.stamp.signatures {
            if verify_detached(previous_verify, sig, &signable).is_ok() {
                return Ok(());
            }
        }
        Err(DocError::Crypto(arx_crypto::CryptoError::CryptoFailure))
    }
}

/// The secret counterpart: Curve25519 `secret` and the Ed25519 `seed`.
/// Never leaves the private portfolio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeys {
    pub stamp: Stamp,
    pub secret: Vec<u8>,
    pub seed: Vec<u8>,
}

impl Document for PrivateKeys {
    const KIND: DocKind = DocKind::PrivateKeys;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put(tag::SECRET, &self.secret);
        w.put(tag::SEED, &self.seed);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::SECRET,
            tag::SEED,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(PrivateKeys {
            stamp: Stamp::from_fields(map)?,
            secret: field::blob(map.one(tag::SECRET)?, 32)?,
            seed: field::blob(map.one(tag::SEED)?, 32)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("privkeys-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("privkeys-secret-size", self.secret.len() == 32, "secret size")?;
        check_that("privkeys-seed-size", self.seed.len() == 32, "seed size")?;
        Ok(())
    }
}

impl PrivateKeys {
    /// Rebuild the signing keypair from the stored seed.
    pub fn sign_keypair(&self) -> Result<SignKeypair> {
        Ok(SignKeypair::from_seed(&self.seed)?)
    }

    /// The Curve25519 secret as a fixed buffer.
    pub fn box_secret(&self) -> Result<SecretBytes<32>> {
        SecretBytes::from_slice(&self.secret)
            .ok_or(DocError::Crypto(arx_crypto::CryptoError::KeyLength(
                self.secret.len(),
            )))
    }
}

/// Generate a fresh key set for `issuer`: published keys, private keys and
/// the signing pair, with the published document signed by the new secret.
pub fn generate_key_set(issuer: uuid::Uuid) -> (Keys, PrivateKeys, SignKeypair) {
    let sign_pair = SignKeypair::generate();
    let box_pair = arx_crypto::box_::BoxKeypair::generate();

    let mut keys = Keys {
        stamp: Stamp::new(issuer, DocKind::Keys),
        public: box_pair.public.to_vec(),
        verify: sign_pair.verify.to_vec(),
    };
    keys.sign(&sign_pair.secret);

    let mut privkeys = PrivateKeys {
        stamp: Stamp::new(issuer, DocKind::PrivateKeys),
        secret: box_pair.secret.expose().to_vec(),
        seed: sign_pair.seed.expose().to_vec(),
    };
    privkeys.sign(&sign_pair.secret);

    (keys, privkeys, sign_pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn generated_set_is_self_consistent() {
        let issuer = Uuid::new_v4();
        let (keys, privkeys, pair) = generate_key_set(issuer);
        keys.validate().unwrap();
        privkeys.validate().unwrap();
        keys.verify_self().unwrap();
        assert_eq!(keys.verify, pair.verify.to_vec());
        let rebuilt = privkeys.sign_keypair().unwrap();
        assert_eq!(rebuilt.verify, pair.verify);
    }

    #[test]
    fn roundtrip() {
        let (keys, privkeys, _) = generate_key_set(Uuid::new_v4());
        assert_eq!(Keys::deserialize(&keys.serialize()).unwrap(), keys);
        assert_eq!(
            PrivateKeys::deserialize(&privkeys.serialize()).unwrap(),
            privkeys
        );
    }

    #[test]
    fn chained_verification_picks_the_right_signature() {
        let issuer = Uuid::new_v4();
        let (old_keys, old_priv, _) = generate_key_set(issuer);
        let (mut new_keys, _, new_pair) = generate_key_set(issuer);

        // dual-sign: self signature plus one by the old secret
        let old_pair = old_priv.sign_keypair().unwrap();
        let self_sig = arx_crypto::sign::sign_detached(&new_pair.secret, &new_keys.signable());
        let chain_sig = arx_crypto::sign::sign_detached(&old_pair.secret, &new_keys.signable());
        new_keys.stamp.signatures = vec![self_sig.to_vec(), chain_sig.to_vec()];

        new_keys.verify_self().unwrap();
        new_keys.verify_chained(&old_keys.verify).unwrap();
        let stranger = arx_crypto::sign::SignKeypair::generate();
        assert!(new_keys.verify_chained(&stranger.verify).is_err());
    }
}
