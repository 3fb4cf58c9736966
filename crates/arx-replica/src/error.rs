use thiserror::Error;

/// Replication error taxonomy. Wire-level faults (`Protocol`,
/// `ChunkMismatch`, `SizeMismatch`) trigger an ABORT and tick the session's
/// threshold counter; `ThresholdReached` and `VersionMismatch` end the
/// session.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("chunk out of order: expected {expected}, got {got}")]
    ChunkMismatch { expected: u32, got: u32 },
    #[error("transfer size mismatch: announced {announced}, got {got}")]
    SizeMismatch { announced: u64, got: u64 },
    #[error("abort threshold reached")]
    ThresholdReached,
    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },
    #[error("peer closed the session")]
    PeerClosed,

    #[error(transparent)]
    Crypto(#[from] arx_crypto::CryptoError),
    #[error(transparent)]
    Archive(#[from] arx_archive::ArchiveError),
    #[error("channel i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplicaError {
    /// Faults that abort the current file but let the session continue.
    pub fn is_abortable(&self) -> bool {
        matches!(
            self,
            ReplicaError::Protocol(_)
                | ReplicaError::ChunkMismatch { .. }
                | ReplicaError::SizeMismatch { .. }
        )
    }
}

/// Result alias for this crate.
pub type Result<T, E = ReplicaError> = std::result::Result<T, E>;
