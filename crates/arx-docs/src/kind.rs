//! The closed set of document kinds.

use crate::error::{DocError, Result};

/// Type tag of a document, the first byte of its canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DocKind {
    Person = 1,
    Ministry = 2,
    Church = 3,
    Keys = 4,
    PrivateKeys = 5,
    Profile = 6,
    Domain = 7,
    Node = 8,
    Network = 9,
    Trusted = 10,
    Verified = 11,
    Revoked = 12,
    Mail = 13,
    Note = 14,
    Instant = 15,
    Report = 16,
    Share = 17,
    Envelope = 18,
    Attachment = 19,
    StoredLetter = 20,
}

impl DocKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        use DocKind::*;
        Ok(match tag {
            1 => Person,
            2 => Ministry,
            3 => Church,
            4 => Keys,
            5 => PrivateKeys,
            6 => Profile,
            7 => Domain,
            8 => Node,
            9 => Network,
            10 => Trusted,
            11 => Verified,
            12 => Revoked,
            13 => Mail,
            14 => Note,
            15 => Instant,
            16 => Report,
            17 => Share,
            18 => Envelope,
            19 => Attachment,
            20 => StoredLetter,
            other => return Err(DocError::InvalidType(other)),
        })
    }

    pub fn is_entity(self) -> bool {
        matches!(self, DocKind::Person | DocKind::Ministry | DocKind::Church)
    }

    /// Vault file extension; attachments never stand alone on disk.
    pub fn extension(self) -> Option<&'static str> {
        use DocKind::*;
        Some(match self {
            Person | Ministry | Church => "ent",
            Keys => "key",
            PrivateKeys => "pky",
            Profile => "pfl",
            Domain => "dom",
            Node => "nod",
            Network => "net",
            Trusted => "trd",
            Verified => "ver",
            Revoked => "rev",
            Mail => "mai",
            Note => "nte",
            Instant => "ins",
            Report => "rpt",
            Share => "shr",
            Envelope => "env",
            StoredLetter => "cml",
            Attachment => return None,
        })
    }

    /// Minimum span between `created` and `expires`.
    pub fn min_expiry(self) -> Period {
        use DocKind::*;
        match self {
            Envelope | Instant => Period::Days(30),
            Mail | StoredLetter | Note | Share | Report | Attachment => Period::Months(3),
            _ => Period::Months(13),
        }
    }
}

/// Expiry floor, month-based for long-lived documents and day-based for
/// transit wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Days(u32),
    Months(u32),
}

impl Period {
    pub fn after(self, date: chrono::NaiveDate) -> chrono::NaiveDate {
        match self {
            Period::Days(days) => date + chrono::Days::new(days as u64),
            Period::Months(months) => date + chrono::Months::new(months),
        }
    }
}
