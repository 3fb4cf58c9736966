//! Block 0: archive identity and layout parameters.
//!
//! On disk: plaintext `magic(8) || u16 version || u16 block_size`, then one
//! AEAD-sealed payload holding the fixed 256-byte header record and the two
//! stream descriptors (entry table and data-area root).

use uuid::Uuid;

use crate::{ArchiveError, Result};

/// Format magic.
pub const MAGIC: [u8; 8] = *b"A7\x01archv";
/// Current format version.
pub const VERSION: u16 = 1;
/// Default plaintext payload bytes per block.
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Fixed sealed header record size.
pub const HEADER_RECORD: usize = 256;
/// Two descriptors of `{u32, u64}` follow the record inside the seal.
pub const DESCRIPTORS: usize = 24;

/// Well-known archive kind bytes.
pub mod kind {
    /// Personal vault holding portfolios, messages and settings.
    pub const VAULT: u8 = 1;
    /// Server-side store-and-forward archive.
    pub const MAIL: u8 = 2;
    /// Cold copy of another archive.
    pub const BACKUP: u8 = 3;
}

/// Archive identity header, sealed into block 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Creation time, nanoseconds since the Unix epoch.
    pub created_ns: i64,
    pub archive_kind: u8,
    pub usage: u8,
    pub role: u8,
    pub owner: Uuid,
    pub node: Uuid,
    pub domain: Uuid,
}

impl ArchiveHeader {
    pub fn new(archive_kind: u8, owner: Uuid, node: Uuid, domain: Uuid) -> Self {
        ArchiveHeader {
            created_ns: chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default(),
            archive_kind,
            usage: 0,
            role: 0,
            owner,
            node,
            domain,
        }
    }

    /// Serialize into the fixed 256-byte record.
    pub fn encode(&self) -> [u8; HEADER_RECORD] {
        let mut out = [0u8; HEADER_RECORD];
        out[0..8].copy_from_slice(&self.created_ns.to_be_bytes());
        out[8] = self.archive_kind;
        out[9] = self.usage;
        out[10] = self.role;
        out[11..27].copy_from_slice(self.owner.as_bytes());
        out[27..43].copy_from_slice(self.node.as_bytes());
        out[43..59].copy_from_slice(self.domain.as_bytes());
        // 59.. reserved
        out
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() != HEADER_RECORD {
            return Err(ArchiveError::InvalidFormat);
        }
        Ok(ArchiveHeader {
            created_ns: i64::from_be_bytes(record[0..8].try_into().expect("8 bytes")),
            archive_kind: record[8],
            usage: record[9],
            role: record[10],
            owner: Uuid::from_slice(&record[11..27]).map_err(|_| ArchiveError::InvalidFormat)?,
            node: Uuid::from_slice(&record[27..43]).map_err(|_| ArchiveError::InvalidFormat)?,
            domain: Uuid::from_slice(&record[43..59]).map_err(|_| ArchiveError::InvalidFormat)?,
        })
    }
}
