//! Entity documents: the self-description at the root of every portfolio.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::document::Document;
use crate::error::{DocError, Result};
use crate::field::{self, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;

const NAME_MAX: usize = 64;

/// A natural person. The entity id doubles as the portfolio id; `issuer`
/// always equals `id` for entities (self-issued).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub stamp: Stamp,
    pub given_name: String,
    pub family_name: String,
    /// All names the person goes by; must contain `given_name`.
    pub names: Vec<String>,
    pub sex: String,
    pub born: NaiveDate,
}

impl Person {
    pub fn create(given_name: &str, family_name: &str, names: &[&str], sex: &str, born: NaiveDate) -> Self {
        let id = Uuid::new_v4();
        let mut stamp = Stamp::new(id, DocKind::Person);
        stamp.id = id;
        Person {
            stamp,
            given_name: given_name.to_string(),
            family_name: family_name.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            sex: sex.to_string(),
            born,
        }
    }
}

impl Document for Person {
    const KIND: DocKind = DocKind::Person;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_str(tag::GIVEN_NAME, &self.given_name);
        w.put_str(tag::FAMILY_NAME, &self.family_name);
        for name in &self.names {
            w.put_str(tag::NAMES, name);
        }
        w.put_str(tag::SEX, &self.sex);
        w.put_date(tag::BORN, &self.born);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::GIVEN_NAME,
            tag::FAMILY_NAME,
            tag::NAMES,
            tag::SEX,
            tag::BORN,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Person {
            stamp: Stamp::from_fields(map)?,
            given_name: field::string(map.one(tag::GIVEN_NAME)?, NAME_MAX)?,
            family_name: field::string(map.one(tag::FAMILY_NAME)?, NAME_MAX)?,
            names: map
                .many(tag::NAMES)
                .map(|n| field::string(n, NAME_MAX))
                .collect::<Result<_>>()?,
            sex: field::string(map.one(tag::SEX)?, 16)?,
            born: field::date(map.one(tag::BORN)?)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("person-self-issued", self_issued(&self.stamp))?;
        check("person-expiry", self.stamp.check_expiry(Self::KIND))?;
        check(
            "person-given-in-names",
            if self.names.contains(&self.given_name) {
                Ok(())
            } else {
                Err(DocError::PersonNamesMismatch)
            },
        )?;
        check_that(
            "person-sex",
            matches!(self.sex.as_str(), "man" | "woman" | "undefined"),
            "sex must be man, woman or undefined",
        )?;
        check_that("person-names-nonempty", !self.names.is_empty(), "no names")?;
        Ok(())
    }

    fn changeable() -> &'static [u8] {
        &[tag::FAMILY_NAME, tag::NAMES]
    }
}

/// A ministry or organisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ministry {
    pub stamp: Stamp,
    pub ministry: String,
    pub vision: String,
    pub founded: NaiveDate,
}

impl Document for Ministry {
    const KIND: DocKind = DocKind::Ministry;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_date(tag::FOUNDED, &self.founded);
        w.put_str(tag::MINISTRY, &self.ministry);
        w.put_str(tag::VISION, &self.vision);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::FOUNDED,
            tag::MINISTRY,
            tag::VISION,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Ministry {
            stamp: Stamp::from_fields(map)?,
            ministry: field::string(map.one(tag::MINISTRY)?, NAME_MAX)?,
            vision: field::string(map.one(tag::VISION)?, 256)?,
            founded: field::date(map.one(tag::FOUNDED)?)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("ministry-self-issued", self_issued(&self.stamp))?;
        check("ministry-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("ministry-named", !self.ministry.is_empty(), "unnamed ministry")?;
        Ok(())
    }

    fn changeable() -> &'static [u8] {
        &[tag::VISION]
    }
}

/// A congregation bound to a place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Church {
    pub stamp: Stamp,
    pub founded: NaiveDate,
    pub city: String,
    pub region: String,
    pub country: String,
}

impl Document for Church {
    const KIND: DocKind = DocKind::Church;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_date(tag::FOUNDED, &self.founded);
        w.put_str(tag::CITY, &self.city);
        w.put_str(tag::REGION, &self.region);
        w.put_str(tag::COUNTRY, &self.country);
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::FOUNDED,
            tag::CITY,
            tag::REGION,
            tag::COUNTRY,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Church {
            stamp: Stamp::from_fields(map)?,
            founded: field::date(map.one(tag::FOUNDED)?)?,
            city: field::string(map.one(tag::CITY)?, NAME_MAX)?,
            region: field::string(map.one(tag::REGION)?, NAME_MAX)?,
            country: field::string(map.one(tag::COUNTRY)?, NAME_MAX)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("church-self-issued", self_issued(&self.stamp))?;
        check("church-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("church-city", !self.city.is_empty(), "church without city")?;
        Ok(())
    }

    fn changeable() -> &'static [u8] {
        &[tag::CITY, tag::REGION, tag::COUNTRY]
    }
}

fn self_issued(stamp: &Stamp) -> Result<()> {
    if stamp.id == stamp.issuer {
        Ok(())
    } else {
        Err(DocError::Malformed(
            "entity must be issued by itself".to_string(),
        ))
    }
}

/// Entity dispatch used by portfolios.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Person(Person),
    Ministry(Ministry),
    Church(Church),
}

impl Entity {
    pub fn stamp(&self) -> &Stamp {
        match self {
            Entity::Person(p) => p.stamp(),
            Entity::Ministry(m) => m.stamp(),
            Entity::Church(c) => c.stamp(),
        }
    }

    pub fn stamp_mut(&mut self) -> &mut Stamp {
        match self {
            Entity::Person(p) => p.stamp_mut(),
            Entity::Ministry(m) => m.stamp_mut(),
            Entity::Church(c) => c.stamp_mut(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.stamp().id
    }

    pub fn kind(&self) -> DocKind {
        match self {
            Entity::Person(_) => DocKind::Person,
            Entity::Ministry(_) => DocKind::Ministry,
            Entity::Church(_) => DocKind::Church,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Entity::Person(p) => p.serialize(),
            Entity::Ministry(m) => m.serialize(),
            Entity::Church(c) => c.serialize(),
        }
    }

    pub fn signable(&self) -> Vec<u8> {
        match self {
            Entity::Person(p) => p.signable(),
            Entity::Ministry(m) => m.signable(),
            Entity::Church(c) => c.signable(),
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        match bytes.first().copied().map(DocKind::from_tag) {
            Some(Ok(DocKind::Person)) => Ok(Entity::Person(Person::deserialize(bytes)?)),
            Some(Ok(DocKind::Ministry)) => Ok(Entity::Ministry(Ministry::deserialize(bytes)?)),
            Some(Ok(DocKind::Church)) => Ok(Entity::Church(Church::deserialize(bytes)?)),
            Some(Ok(other)) => Err(DocError::InvalidType(other.tag())),
            Some(Err(e)) => Err(e),
            None => Err(DocError::Malformed("empty entity".into())),
        }
    }

    pub fn sign(&mut self, secret: &arx_crypto::SecretBytes<64>) {
        match self {
            Entity::Person(p) => p.sign(secret),
            Entity::Ministry(m) => m.sign(secret),
            Entity::Church(c) => c.sign(secret),
        }
    }

    pub fn verify(&self, verify_key: &[u8]) -> Result<()> {
        match self {
            Entity::Person(p) => p.verify(verify_key),
            Entity::Ministry(m) => m.verify(verify_key),
            Entity::Church(c) => c.verify(verify_key),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Entity::Person(p) => p.validate(),
            Entity::Ministry(m) => m.validate(),
            Entity::Church(c) => c.validate(),
        }
    }

    /// Immutable-field comparison dispatching on the concrete type; a kind
    /// change never matches.
    pub fn immutable_match(&self, newer: &Entity) -> bool {
        use crate::document::immutable_fields_match;
        match (self, newer) {
            (Entity::Person(a), Entity::Person(b)) => immutable_fields_match(a, b),
            (Entity::Ministry(a), Entity::Ministry(b)) => immutable_fields_match(a, b),
            (Entity::Church(a), Entity::Church(b)) => immutable_fields_match(a, b),
            _ => false,
        }
    }
}
