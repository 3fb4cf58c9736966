//! Profile: the mutable public face of an entity.

use crate::document::Document;
use crate::error::{DocError, Result};
use crate::field::{self, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;

const PICTURE_MAX: usize = 64 * 1024;
const ABOUT_MAX: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileFields {
    pub picture: Option<Vec<u8>>,
    pub about: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub language: Vec<String>,
    pub social: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub stamp: Stamp,
    pub fields: ProfileFields,
}

impl Profile {
    pub fn empty(issuer: uuid::Uuid) -> Self {
        Profile {
            stamp: Stamp::new(issuer, DocKind::Profile),
            fields: ProfileFields::default(),
        }
    }
}

impl Document for Profile {
    const KIND: DocKind = DocKind::Profile;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        let f = &self.fields;
        if let Some(picture) = &f.picture {
            w.put(tag::PICTURE, picture);
        }
        if let Some(about) = &f.about {
            w.put_str(tag::ABOUT, about);
        }
        if let Some(email) = &f.email {
            w.put_str(tag::EMAIL, email);
        }
        if let Some(mobile) = &f.mobile {
            w.put_str(tag::MOBILE, mobile);
        }
        if let Some(phone) = &f.phone {
            w.put_str(tag::PHONE, phone);
        }
        if let Some(address) = &f.address {
            w.put_str(tag::ADDRESS, address);
        }
        for lang in &f.language {
            w.put_str(tag::LANGUAGE, lang);
        }
        for social in &f.social {
            w.put_str(tag::SOCIAL, social);
        }
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::PICTURE,
            tag::ABOUT,
            tag::EMAIL,
            tag::MOBILE,
            tag::PHONE,
            tag::ADDRESS,
            tag::LANGUAGE,
            tag::SOCIAL,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Profile {
            stamp: Stamp::from_fields(map)?,
            fields: ProfileFields {
                picture: map
                    .opt(tag::PICTURE)
                    .map(|b| field::blob(b, PICTURE_MAX))
                    .transpose()?,
                about: map
                    .opt(tag::ABOUT)
                    .map(|b| field::string(b, ABOUT_MAX))
                    .transpose()?,
                email: map
                    .opt(tag::EMAIL)
                    .map(|b| field::string(b, 128))
                    .transpose()?,
                mobile: map
                    .opt(tag::MOBILE)
                    .map(|b| field::string(b, 32))
                    .transpose()?,
                phone: map
                    .opt(tag::PHONE)
                    .map(|b| field::string(b, 32))
                    .transpose()?,
                address: map
                    .opt(tag::ADDRESS)
                    .map(|b| field::string(b, 256))
                    .transpose()?,
                language: map
                    .many(tag::LANGUAGE)
                    .map(|b| field::string(b, 8))
                    .collect::<Result<_>>()?,
                social: map
                    .many(tag::SOCIAL)
                    .map(|b| field::string(b, 128))
                    .collect::<Result<_>>()?,
            },
        })
    }

    fn validate(&self) -> Result<()> {
        check("profile-expiry", self.stamp.check_expiry(Self::KIND))?;
        if let Some(email) = &self.fields.email {
            check("profile-email", check_email(email))?;
        }
        check_that(
            "profile-picture-size",
            self.fields
                .picture
                .as_ref()
                .map_or(true, |p| p.len() <= PICTURE_MAX),
            "picture too large",
        )?;
        Ok(())
    }

    fn changeable() -> &'static [u8] {
        // everything but identity is fair game across updates
        &[
            tag::PICTURE,
            tag::ABOUT,
            tag::EMAIL,
            tag::MOBILE,
            tag::PHONE,
            tag::ADDRESS,
            tag::LANGUAGE,
            tag::SOCIAL,
        ]
    }
}

/// Shape check only: `local@domain` with a dotted domain.
pub fn check_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DocError::InvalidEmail(email.to_string()))
    }
}
