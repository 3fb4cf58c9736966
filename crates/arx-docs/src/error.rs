use thiserror::Error;

use crate::report::Report;

/// Document and policy error taxonomy.
///
/// The validation variants are collected into the in-scope [`Report`] by the
/// batch validators and surfaced together as `PolicyBreach`; everything else
/// propagates immediately.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("unknown or misplaced field/type tag {0}")]
    InvalidType(u8),
    #[error("field exceeds its limit: {0}")]
    BeyondLimit(String),
    #[error("missing mandatory field tag {0}")]
    MissingField(u8),
    #[error("document expires too early: {0}")]
    ShortExpiry(String),
    #[error("given name not among registered names")]
    PersonNamesMismatch,
    #[error("malformed email address: {0}")]
    InvalidEmail(String),
    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("policy breach: {0:?}")]
    PolicyBreach(Report),

    #[error(transparent)]
    Crypto(#[from] arx_crypto::CryptoError),
    #[error(transparent)]
    Archive(#[from] arx_archive::ArchiveError),
}

/// Result alias for this crate.
pub type Result<T, E = DocError> = std::result::Result<T, E>;
