use thiserror::Error;

/// Error taxonomy for the archive layer.
///
/// `InvalidFormat` and `BlockIntegrity` mean the image itself is unusable
/// and the archive is closed; the filesystem-level variants are surfaced to
/// the caller and never retried automatically.
#[derive(Debug, Error)]
pub enum ArchiveError {
    // Image-level, fatal.
    #[error("not an archive image or unsupported version")]
    InvalidFormat,
    #[error("block {0} failed integrity check")]
    BlockIntegrity(u64),
    #[error("read past end of stream {0}")]
    StreamBounds(u32),

    // Filesystem-level, surfaced to the caller.
    #[error("invalid path: {0}")]
    PathInvalid(String),
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("entry has wrong kind: {0}")]
    WrongEntry(String),
    #[error("name already taken: {0}")]
    NameTaken(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("content digest mismatch: {0}")]
    DigestInvalid(String),
    #[error("link target missing: {0}")]
    LinkBroken(String),
    #[error("link may not point at another link: {0}")]
    Link2Link(String),

    #[error(transparent)]
    Crypto(#[from] arx_crypto::CryptoError),
    #[error("archive i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// True when the archive image must be considered corrupt and closed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchiveError::InvalidFormat | ArchiveError::BlockIntegrity(_)
        )
    }
}
