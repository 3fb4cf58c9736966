//! Entry records of the archive filesystem.
//!
//! Records live as fixed-width slots in the entry-table stream, so slot `k`
//! sits at byte offset `k * ENTRY_SIZE` and can be rewritten in place. An
//! all-zero kind byte marks a vacant slot.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{ArchiveError, Result};

/// Fixed record width. The enumerated fields occupy 421 bytes; the
/// remainder is reserved.
pub const ENTRY_SIZE: usize = 512;
/// Maximum entry name length in bytes.
pub const NAME_MAX: usize = 255;

/// What an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Link,
}

impl EntryKind {
    fn to_byte(self) -> u8 {
        match self {
            EntryKind::File => 1,
            EntryKind::Directory => 2,
            EntryKind::Link => 3,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(EntryKind::File),
            2 => Ok(EntryKind::Directory),
            3 => Ok(EntryKind::Link),
            _ => Err(ArchiveError::InvalidFormat),
        }
    }
}

/// One filesystem object: file, directory or link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: Uuid,
    /// Nil means the archive root.
    pub parent: Uuid,
    pub kind: EntryKind,
    pub name: String,
    /// Exact plaintext byte count for files; zero otherwise.
    pub size: u64,
    /// Head block of the content stream for files; zero otherwise.
    pub first_block: u64,
    /// Chain-integrity tag of the content stream.
    pub stream_tag: u8,
    pub owner: Uuid,
    /// POSIX-like permission bits.
    pub perms: u16,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Tombstone flag; deleted entries linger until compaction.
    pub deleted: bool,
    /// BLAKE2b-512 of plaintext file content; zero for non-files.
    pub digest: [u8; 64],
    /// Target entry id for links; nil otherwise.
    pub target: Uuid,
}

impl Entry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_link(&self) -> bool {
        self.kind == EntryKind::Link
    }

    /// Serialize into a record slot.
    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[0..16].copy_from_slice(self.id.as_bytes());
        out[16..32].copy_from_slice(self.parent.as_bytes());
        out[32] = self.kind.to_byte();
        let name = self.name.as_bytes();
        debug_assert!(name.len() <= NAME_MAX);
        out[33] = name.len() as u8;
        out[34..34 + name.len()].copy_from_slice(name);
        out[289..297].copy_from_slice(&self.size.to_be_bytes());
        out[297..305].copy_from_slice(&self.first_block.to_be_bytes());
        out[305] = self.stream_tag;
        out[306..322].copy_from_slice(self.owner.as_bytes());
        out[322..324].copy_from_slice(&self.perms.to_be_bytes());
        out[324..332].copy_from_slice(&self.created.timestamp().to_be_bytes());
        out[332..340].copy_from_slice(&self.modified.timestamp().to_be_bytes());
        out[340] = self.deleted as u8;
        out[341..405].copy_from_slice(&self.digest);
        out[405..421].copy_from_slice(self.target.as_bytes());
        out
    }

    /// Parse a record slot; `Ok(None)` for a vacant slot.
    pub fn decode(record: &[u8]) -> Result<Option<Self>> {
        if record.len() != ENTRY_SIZE {
            return Err(ArchiveError::InvalidFormat);
        }
        if record[32] == 0 {
            return Ok(None);
        }
        let name_len = record[33] as usize;
        let name = String::from_utf8(record[34..34 + name_len].to_vec())
            .map_err(|_| ArchiveError::InvalidFormat)?;
        let created = DateTime::<Utc>::from_timestamp(
            i64::from_be_bytes(record[324..332].try_into().expect("8 bytes")),
            0,
        )
        .ok_or(ArchiveError::InvalidFormat)?;
        let modified = DateTime::<Utc>::from_timestamp(
            i64::from_be_bytes(record[332..340].try_into().expect("8 bytes")),
            0,
        )
        .ok_or(ArchiveError::InvalidFormat)?;
        let mut digest = [0u8; 64];
        digest.copy_from_slice(&record[341..405]);

        Ok(Some(Entry {
            id: Uuid::from_slice(&record[0..16]).expect("16 bytes"),
            parent: Uuid::from_slice(&record[16..32]).expect("16 bytes"),
            kind: EntryKind::from_byte(record[32])?,
            name,
            size: u64::from_be_bytes(record[289..297].try_into().expect("8 bytes")),
            first_block: u64::from_be_bytes(record[297..305].try_into().expect("8 bytes")),
            stream_tag: record[305],
            owner: Uuid::from_slice(&record[306..322]).expect("16 bytes"),
            perms: u16::from_be_bytes(record[322..324].try_into().expect("2 bytes")),
            created,
            modified,
            deleted: record[340] != 0,
            digest,
            target: Uuid::from_slice(&record[405..421]).expect("16 bytes"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry {
            id: Uuid::new_v4(),
            parent: Uuid::new_v4(),
            kind: EntryKind::File,
            name: "statement.mai".to_string(),
            size: 1234,
            first_block: 7,
            stream_tag: 7,
            owner: Uuid::new_v4(),
            perms: 0o644,
            created: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            modified: DateTime::from_timestamp(1_600_000_100, 0).unwrap(),
            deleted: false,
            digest: [0xAA; 64],
            target: Uuid::nil(),
        }
    }

    #[test]
    fn roundtrip() {
        let entry = sample();
        let rec = entry.encode();
        assert_eq!(Entry::decode(&rec).unwrap().unwrap(), entry);
    }

    #[test]
    fn vacant_slot_decodes_to_none() {
        assert!(Entry::decode(&[0u8; ENTRY_SIZE]).unwrap().is_none());
    }

    #[test]
    fn max_name_fits() {
        let mut entry = sample();
        entry.name = "x".repeat(NAME_MAX);
        let rec = entry.encode();
        assert_eq!(Entry::decode(&rec).unwrap().unwrap().name, entry.name);
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut rec = sample().encode();
        rec[32] = 9;
        assert!(Entry::decode(&rec).is_err());
    }
}
