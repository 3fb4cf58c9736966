//! Per-file action resolution.
//!
//! Both ends of a session compute the same pure function over the two file
//! states; the client proposes, the server independently recomputes and
//! confirms. A disagreement skips the file and ticks the abort counter.

use chrono::{DateTime, Utc};

use crate::packet::FileInfo;
use crate::{ReplicaError, Result};

/// What a session does about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Nop,
    CliCreate,
    CliUpdate,
    CliDelete,
    SerCreate,
    SerUpdate,
    SerDelete,
}

impl SyncAction {
    pub fn to_byte(self) -> u8 {
        match self {
            SyncAction::Nop => 0,
            SyncAction::CliCreate => 1,
            SyncAction::CliUpdate => 2,
            SyncAction::CliDelete => 3,
            SyncAction::SerCreate => 4,
            SyncAction::SerUpdate => 5,
            SyncAction::SerDelete => 6,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => SyncAction::Nop,
            1 => SyncAction::CliCreate,
            2 => SyncAction::CliUpdate,
            3 => SyncAction::CliDelete,
            4 => SyncAction::SerCreate,
            5 => SyncAction::SerUpdate,
            6 => SyncAction::SerDelete,
            other => return Err(ReplicaError::Protocol(format!("unknown action {other}"))),
        })
    }
}

/// One side's knowledge of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub modified: DateTime<Utc>,
    pub deleted: bool,
}

impl FileState {
    pub fn from_info(info: &FileInfo) -> Option<Self> {
        info.exists.then_some(FileState {
            modified: info.modified,
            deleted: info.deleted,
        })
    }
}

/// The nine-row resolution table. `None` means the side has no record of
/// the file at all; a `deleted` state is a tombstone that still counts as
/// existing.
pub fn resolve_action(client: Option<&FileState>, server: Option<&FileState>) -> SyncAction {
    match (client, server) {
        (None, None) => SyncAction::Nop,
        (None, Some(s)) if !s.deleted => SyncAction::CliCreate,
        (None, Some(_)) => SyncAction::Nop,
        (Some(c), None) if c.deleted => SyncAction::Nop,
        (Some(_), None) => SyncAction::SerCreate,
        (Some(c), Some(s)) => match (c.deleted, s.deleted) {
            (true, false) => {
                if c.modified > s.modified {
                    SyncAction::SerDelete
                } else {
                    SyncAction::CliUpdate
                }
            }
            (true, true) => SyncAction::Nop,
            (false, false) => {
                if c.modified > s.modified {
                    SyncAction::SerUpdate
                } else {
                    SyncAction::CliUpdate
                }
            }
            (false, true) => {
                if c.modified > s.modified {
                    SyncAction::SerUpdate
                } else {
                    SyncAction::CliDelete
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(modified_offset: i64, deleted: bool) -> FileState {
        FileState {
            modified: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(modified_offset),
            deleted,
        }
    }

    /// Every row of the table, with both modified orders where the row
    /// branches on them.
    #[test]
    fn full_table() {
        let live_old = state(100, false);
        let live_new = state(200, false);
        let dead_old = state(100, true);
        let dead_new = state(200, true);

        // N - N -
        assert_eq!(resolve_action(None, None), SyncAction::Nop);
        // N - Y N
        assert_eq!(resolve_action(None, Some(&live_old)), SyncAction::CliCreate);
        // N - Y Y
        assert_eq!(resolve_action(None, Some(&dead_old)), SyncAction::Nop);
        // Y Y N -
        assert_eq!(resolve_action(Some(&dead_old), None), SyncAction::Nop);
        // Y Y Y N
        assert_eq!(
            resolve_action(Some(&dead_new), Some(&live_old)),
            SyncAction::SerDelete
        );
        assert_eq!(
            resolve_action(Some(&dead_old), Some(&live_new)),
            SyncAction::CliUpdate
        );
        // Y Y Y Y
        assert_eq!(resolve_action(Some(&dead_old), Some(&dead_new)), SyncAction::Nop);
        // Y N N -
        assert_eq!(resolve_action(Some(&live_old), None), SyncAction::SerCreate);
        // Y N Y N
        assert_eq!(
            resolve_action(Some(&live_new), Some(&live_old)),
            SyncAction::SerUpdate
        );
        assert_eq!(
            resolve_action(Some(&live_old), Some(&live_new)),
            SyncAction::CliUpdate
        );
        // Y N Y Y
        assert_eq!(
            resolve_action(Some(&live_new), Some(&dead_old)),
            SyncAction::SerUpdate
        );
        assert_eq!(
            resolve_action(Some(&live_old), Some(&dead_new)),
            SyncAction::CliDelete
        );
    }

    /// Both sides agree for every pairing of states drawn from the table's
    /// domain (determinism, property 10).
    #[test]
    fn deterministic_for_all_pairs() {
        let mut states: Vec<Option<FileState>> = vec![None];
        for offset in [100, 200] {
            for deleted in [false, true] {
                states.push(Some(state(offset, deleted)));
            }
        }
        for client in &states {
            for server in &states {
                let once = resolve_action(client.as_ref(), server.as_ref());
                let again = resolve_action(client.as_ref(), server.as_ref());
                assert_eq!(once, again);
            }
        }
    }

    #[test]
    fn action_bytes_roundtrip() {
        for byte in 0..=6u8 {
            assert_eq!(SyncAction::from_byte(byte).unwrap().to_byte(), byte);
        }
        assert!(SyncAction::from_byte(7).is_err());
    }
}
