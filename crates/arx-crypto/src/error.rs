use thiserror::Error;

/// Error taxonomy for the primitive layer.
///
/// `KeyLength`, `NonceLength` and `HashLength` indicate a caller bug and are
/// fatal for the calling operation. `CryptoFailure` is the recoverable case:
/// a MAC, signature or AEAD tag did not check out on externally supplied
/// input.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key has wrong length: {0} bytes")]
    KeyLength(usize),
    #[error("nonce has wrong length: {0} bytes")]
    NonceLength(usize),
    #[error("digest length out of range: {0} bytes")]
    HashLength(usize),
    #[error("verification or decryption failed")]
    CryptoFailure,
    #[error("secret store entry not found: {0}")]
    SecretMissing(String),
    #[error("secret store file malformed: {0}")]
    StoreMalformed(String),
    #[error("secret store i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// True for errors a caller may meaningfully handle (bad peer input);
    /// false for programmer errors.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CryptoError::CryptoFailure | CryptoError::SecretMissing(_)
        )
    }
}
