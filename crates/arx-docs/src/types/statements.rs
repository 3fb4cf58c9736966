//! Statements: trust, verification and revocation between portfolios.

use uuid::Uuid;

use crate::document::Document;
use crate::error::Result;
use crate::field::{self, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;

macro_rules! owner_statement {
    ($ty:ident, $kind:expr, $rule:literal) => {
        /// Statement by `issuer` about the portfolio of `owner`.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $ty {
            pub stamp: Stamp,
            pub owner: Uuid,
        }

        impl $ty {
            pub fn create(issuer: Uuid, owner: Uuid) -> Self {
                $ty {
                    stamp: Stamp::new(issuer, $kind),
                    owner,
                }
            }
        }

        impl Document for $ty {
            const KIND: DocKind = $kind;

            fn stamp(&self) -> &Stamp {
                &self.stamp
            }

            fn stamp_mut(&mut self) -> &mut Stamp {
                &mut self.stamp
            }

            fn write_body(&self, w: &mut FieldWriter) {
                w.put_uuid(tag::OWNER, &self.owner);
            }

            fn allowed_tags() -> &'static [u8] {
                &[
                    tag::ID,
                    tag::ISSUER,
                    tag::CREATED,
                    tag::EXPIRES,
                    tag::UPDATED,
                    tag::OWNER,
                    tag::SIGNATURE,
                ]
            }

            fn from_map(map: &FieldMap) -> Result<Self> {
                Ok($ty {
                    stamp: Stamp::from_fields(map)?,
                    owner: field::uuid(map.one(tag::OWNER)?)?,
                })
            }

            fn validate(&self) -> Result<()> {
                check(concat!($rule, "-expiry"), self.stamp.check_expiry($kind))?;
                check_that(
                    concat!($rule, "-distinct"),
                    self.owner != self.stamp.issuer,
                    "statement about oneself",
                )?;
                check_that(
                    concat!($rule, "-owner"),
                    !self.owner.is_nil(),
                    "statement without owner",
                )?;
                Ok(())
            }
        }
    };
}

owner_statement!(Trusted, DocKind::Trusted, "trusted");
owner_statement!(Verified, DocKind::Verified, "verified");

/// Withdraws an earlier Trusted/Verified statement by the same issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revoked {
    pub stamp: Stamp,
    /// Id of the statement being withdrawn.
    pub statement: Uuid,
}

impl Revoked {
    pub fn create(issuer: Uuid, statement: Uuid) -> Self {
        Revoked {
            stamp: Stamp::new(issuer, DocKind::Revoked),
            statement,
        }
    }
}

impl Document for Revoked {
    const KIND: DocKind = DocKind::Revoked;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::STATEMENT, &self.statement);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::STATEMENT,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Revoked {
            stamp: Stamp::from_fields(map)?,
            statement: field::uuid(map.one(tag::STATEMENT)?)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("revoked-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that(
            "revoked-reference",
            !self.statement.is_nil(),
            "revocation without reference",
        )?;
        Ok(())
    }
}
