use thiserror::Error;

/// Mailbox-layer errors. `StoreMismatch` is fatal for the operation and
/// guarantees no side effects were applied.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("envelope and message disagree: {0}")]
    StoreMismatch(&'static str),
    #[error("message is not addressed as claimed: {0}")]
    Misaddressed(&'static str),

    #[error(transparent)]
    Doc(#[from] arx_docs::DocError),
    #[error(transparent)]
    Crypto(#[from] arx_crypto::CryptoError),
    #[error(transparent)]
    Archive(#[from] arx_archive::ArchiveError),
}
