//! Message documents carried between portfolios.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::document::Document;
use crate::error::Result;
use crate::field::{self, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;

const SUBJECT_MAX: usize = 128;
const BODY_MAX: usize = 128 * 1024;
const ATT_NAME_MAX: usize = 255;
const ATT_DATA_MAX: usize = 4 * 1024 * 1024;

/// A named binary attachment, nested inside mail and shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub stamp: Stamp,
    pub name: String,
    pub data: Vec<u8>,
}

impl Document for Attachment {
    const KIND: DocKind = DocKind::Attachment;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_str(tag::ATT_NAME, &self.name);
        w.put(tag::ATT_DATA, &self.data);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::ATT_NAME,
            tag::ATT_DATA,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Attachment {
            stamp: Stamp::from_fields(map)?,
            name: field::string(map.one(tag::ATT_NAME)?, ATT_NAME_MAX)?,
            data: field::blob(map.one(tag::ATT_DATA)?, ATT_DATA_MAX)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check_that("attachment-named", !self.name.is_empty(), "unnamed attachment")?;
        Ok(())
    }
}

/// Store-and-forward letter from `issuer` to `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub stamp: Stamp,
    pub owner: Uuid,
    pub subject: String,
    pub body: String,
    pub reply: Option<Uuid>,
    pub attachments: Vec<Attachment>,
    /// When the letter left the sender; compared against the envelope's
    /// posting time on receipt.
    pub posted: DateTime<Utc>,
}

impl Mail {
    pub fn compose(issuer: Uuid, owner: Uuid, subject: &str, body: &str) -> Self {
        Mail {
            stamp: Stamp::new(issuer, DocKind::Mail),
            owner,
            subject: subject.to_string(),
            body: body.to_string(),
            reply: None,
            attachments: Vec::new(),
            posted: crate::now_utc(),
        }
    }
}

impl Document for Mail {
    const KIND: DocKind = DocKind::Mail;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::OWNER, &self.owner);
        w.put_str(tag::SUBJECT, &self.subject);
        w.put_str(tag::BODY, &self.body);
        if let Some(reply) = &self.reply {
            w.put_uuid(tag::REPLY, reply);
        }
        for att in &self.attachments {
            w.put(tag::ATTACHMENTS, &att.serialize());
        }
        w.put_datetime(tag::POSTED, &self.posted);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::OWNER,
            tag::SUBJECT,
            tag::BODY,
            tag::REPLY,
            tag::ATTACHMENTS,
            tag::POSTED,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Mail {
            stamp: Stamp::from_fields(map)?,
            owner: field::uuid(map.one(tag::OWNER)?)?,
            subject: field::string(map.one(tag::SUBJECT)?, SUBJECT_MAX)?,
            body: field::string(map.one(tag::BODY)?, BODY_MAX)?,
            reply: map.opt(tag::REPLY).map(field::uuid).transpose()?,
            attachments: map
                .many(tag::ATTACHMENTS)
                .map(Attachment::deserialize)
                .collect::<Result<_>>()?,
            posted: field::datetime(map.one(tag::POSTED)?)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("mail-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that(
            "mail-distinct-parties",
            self.stamp.issuer != self.owner,
            "mail addressed to its issuer",
        )?;
        check_that("mail-owner", !self.owner.is_nil(), "mail without recipient")?;
        for att in &self.attachments {
            att.validate()?;
        }
        Ok(())
    }
}

/// Personal note, never addressed to anyone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub stamp: Stamp,
    pub body: String,
}

impl Document for Note {
    const KIND: DocKind = DocKind::Note;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_str(tag::BODY, &self.body);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::BODY,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Note {
            stamp: Stamp::from_fields(map)?,
            body: field::string(map.one(tag::BODY)?, 4096)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("note-expiry", self.stamp.check_expiry(Self::KIND))?;
        Ok(())
    }
}

/// Short immediate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instant {
    pub stamp: Stamp,
    pub owner: Uuid,
    pub body: String,
}

impl Document for Instant {
    const KIND: DocKind = DocKind::Instant;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::OWNER, &self.owner);
        w.put_str(tag::BODY, &self.body);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::OWNER,
            tag::BODY,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Instant {
            stamp: Stamp::from_fields(map)?,
            owner: field::uuid(map.one(tag::OWNER)?)?,
            body: field::string(map.one(tag::BODY)?, 4096)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("instant-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that(
            "instant-distinct-parties",
            self.stamp.issuer != self.owner,
            "instant addressed to its issuer",
        )?;
        Ok(())
    }
}

/// Complaint or abuse report, usually referencing cached evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDoc {
    pub stamp: Stamp,
    pub owner: Uuid,
    pub claims: String,
}

impl Document for ReportDoc {
    const KIND: DocKind = DocKind::Report;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::OWNER, &self.owner);
        w.put_str(tag::BODY, &self.claims);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::OWNER,
            tag::BODY,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(ReportDoc {
            stamp: Stamp::from_fields(map)?,
            owner: field::uuid(map.one(tag::OWNER)?)?,
            claims: field::string(map.one(tag::BODY)?, 4096)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("report-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("report-claims", !self.claims.is_empty(), "empty report")?;
        Ok(())
    }
}

/// Shared content with attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub stamp: Stamp,
    pub owner: Uuid,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Document for Share {
    const KIND: DocKind = DocKind::Share;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::OWNER, &self.owner);
        w.put_str(tag::BODY, &self.body);
        for att in &self.attachments {
            w.put(tag::ATTACHMENTS, &att.serialize());
        }
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::OWNER,
            tag::BODY,
            tag::ATTACHMENTS,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Share {
            stamp: Stamp::from_fields(map)?,
            owner: field::uuid(map.one(tag::OWNER)?)?,
            body: field::string(map.one(tag::BODY)?, BODY_MAX)?,
            attachments: map
                .many(tag::ATTACHMENTS)
                .map(Attachment::deserialize)
                .collect::<Result<_>>()?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("share-expiry", self.stamp.check_expiry(Self::KIND))?;
        for att in &self.attachments {
            att.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocError;

    #[test]
    fn mail_roundtrip_with_attachment() {
        let mut mail = Mail::compose(Uuid::new_v4(), Uuid::new_v4(), "hi", "x");
        mail.attachments.push(Attachment {
            stamp: Stamp::new(mail.stamp.issuer, DocKind::Attachment),
            name: "notes.txt".into(),
            data: vec![1, 2, 3],
        });
        let bytes = mail.serialize();
        assert_eq!(Mail::deserialize(&bytes).unwrap(), mail);
    }

    #[test]
    fn mail_to_self_is_invalid() {
        let me = Uuid::new_v4();
        let mail = Mail::compose(me, me, "hi", "x");
        assert!(mail.validate().is_err());
    }

    #[test]
    fn oversized_subject_is_beyond_limit() {
        let mail = Mail::compose(Uuid::new_v4(), Uuid::new_v4(), &"s".repeat(200), "x");
        let bytes = mail.serialize();
        assert!(matches!(
            Mail::deserialize(&bytes),
            Err(DocError::BeyondLimit(_))
        ));
    }
}
