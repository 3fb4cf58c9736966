//! The administrative core every document shares: identity, issuer, dates
//! and signatures.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{DocError, Result};
use crate::field::{self, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;

/// Common document head. `signatures` usually holds exactly one detached
/// Ed25519 signature; a rotating `Keys` document carries two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub id: Uuid,
    pub issuer: Uuid,
    pub created: NaiveDate,
    pub expires: NaiveDate,
    pub updated: Option<NaiveDate>,
    pub signatures: Vec<Vec<u8>>,
}

impl Stamp {
    /// Fresh stamp dated today with the kind's default expiry window.
    pub fn new(issuer: Uuid, kind: DocKind) -> Self {
        let today = Utc::now().date_naive();
        Stamp {
            id: Uuid::new_v4(),
            issuer,
            created: today,
            expires: kind.min_expiry().after(today),
            updated: None,
            signatures: Vec::new(),
        }
    }

    /// Tags the stamp contributes to a field set.
    pub const TAGS: [u8; 6] = [
        tag::ID,
        tag::ISSUER,
        tag::CREATED,
        tag::EXPIRES,
        tag::UPDATED,
        tag::SIGNATURE,
    ];

    /// Write the leading stamp fields (everything but signatures, which sort
    /// last).
    pub fn write_head(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::ID, &self.id);
        w.put_uuid(tag::ISSUER, &self.issuer);
        w.put_date(tag::CREATED, &self.created);
        w.put_date(tag::EXPIRES, &self.expires);
    }

    pub fn write_updated(&self, w: &mut FieldWriter) {
        if let Some(updated) = &self.updated {
            w.put_date(tag::UPDATED, updated);
        }
    }

    pub fn write_signatures(&self, w: &mut FieldWriter) {
        for sig in &self.signatures {
            w.put(tag::SIGNATURE, sig);
        }
    }

    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        Ok(Stamp {
            id: field::uuid(map.one(tag::ID)?)?,
            issuer: field::uuid(map.one(tag::ISSUER)?)?,
            created: field::date(map.one(tag::CREATED)?)?,
            expires: field::date(map.one(tag::EXPIRES)?)?,
            updated: map.opt(tag::UPDATED).map(field::date).transpose()?,
            signatures: map
                .many(tag::SIGNATURE)
                .map(|s| field::blob(s, 64))
                .collect::<Result<_>>()?,
        })
    }

    /// `expires >= created + min_period[kind]`, else [`DocError::ShortExpiry`].
    pub fn check_expiry(&self, kind: DocKind) -> Result<()> {
        let floor = kind.min_expiry().after(self.created);
        if self.expires < floor {
            return Err(DocError::ShortExpiry(format!(
                "{:?} expires {} before {}",
                kind, self.expires, floor
            )));
        }
        Ok(())
    }

    pub fn is_expired_at(&self, today: NaiveDate) -> bool {
        self.expires < today
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().date_naive())
    }

    /// The date that counts for update monotonicity.
    pub fn effective_date(&self) -> NaiveDate {
        self.updated.unwrap_or(self.created)
    }
}
