//! Canonical field serialization.
//!
//! Every document serializes to `kind_tag || field*` where each field is
//! `tag(u8) || len(u32 be) || bytes` and fields appear in ascending tag
//! order (lists repeat their tag). The same byte layout feeds signing,
//! hashing and storage, so it must be deterministic down to the last byte.
//!
//! Deserialization is total: a tag outside the target type's field set is
//! [`DocError::InvalidType`], a length running past the input or over a
//! per-field maximum is [`DocError::BeyondLimit`].

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::{DocError, Result};

/// Field tags, global across document types.
pub mod tag {
    pub const ID: u8 = 1;
    pub const ISSUER: u8 = 2;
    pub const CREATED: u8 = 3;
    pub const EXPIRES: u8 = 4;
    pub const UPDATED: u8 = 6;
    pub const OWNER: u8 = 7;

    pub const GIVEN_NAME: u8 = 10;
    pub const FAMILY_NAME: u8 = 11;
    pub const NAMES: u8 = 12;
    pub const SEX: u8 = 13;
    pub const BORN: u8 = 14;
    pub const FOUNDED: u8 = 15;
    pub const CITY: u8 = 16;
    pub const REGION: u8 = 17;
    pub const COUNTRY: u8 = 18;
    pub const MINISTRY: u8 = 19;
    pub const VISION: u8 = 20;

    pub const PUBLIC: u8 = 21;
    pub const VERIFY: u8 = 22;
    pub const SECRET: u8 = 23;
    pub const SEED: u8 = 24;

    pub const PICTURE: u8 = 25;
    pub const ABOUT: u8 = 26;
    pub const EMAIL: u8 = 27;
    pub const MOBILE: u8 = 28;
    pub const PHONE: u8 = 29;
    pub const ADDRESS: u8 = 30;
    pub const LANGUAGE: u8 = 31;
    pub const SOCIAL: u8 = 32;

    pub const DOMAIN: u8 = 33;
    pub const HOSTNAME: u8 = 34;
    pub const ROLE: u8 = 35;
    pub const DEVICE: u8 = 36;
    pub const SERIAL: u8 = 37;
    pub const IP: u8 = 38;
    pub const HOSTS: u8 = 39;
    pub const NODE: u8 = 40;

    pub const SUBJECT: u8 = 41;
    pub const BODY: u8 = 42;
    pub const REPLY: u8 = 43;
    pub const ATTACHMENTS: u8 = 44;
    pub const SEALED: u8 = 45;
    pub const POSTED: u8 = 46;
    pub const HEADERS: u8 = 47;
    pub const OP: u8 = 48;
    pub const TIMESTAMP: u8 = 49;
    pub const STATEMENT: u8 = 50;
    pub const ATT_NAME: u8 = 51;
    pub const ATT_DATA: u8 = 52;

    pub const ENVELOPE: u8 = 55;
    pub const MESSAGE: u8 = 56;

    /// Signatures sort last so the signable prefix is simply "all fields
    /// below this tag".
    pub const SIGNATURE: u8 = 255;
}

/// Serializer keeping fields in canonical (ascending-tag) order.
#[derive(Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
    last: u8,
}

impl FieldWriter {
    pub fn new() -> Self {
        FieldWriter::default()
    }

    pub fn put(&mut self, tag: u8, bytes: &[u8]) {
        debug_assert!(tag >= self.last, "fields must be written in tag order");
        self.last = tag;
        self.buf.push(tag);
        self.buf
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_uuid(&mut self, tag: u8, value: &Uuid) {
        self.put(tag, value.as_bytes());
    }

    pub fn put_date(&mut self, tag: u8, value: &NaiveDate) {
        self.put(tag, value.format("%Y-%m-%d").to_string().as_bytes());
    }

    pub fn put_datetime(&mut self, tag: u8, value: &DateTime<Utc>) {
        self.put(
            tag,
            value
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .as_bytes(),
        );
    }

    pub fn put_str(&mut self, tag: u8, value: &str) {
        self.put(tag, value.as_bytes());
    }

    pub fn put_u8(&mut self, tag: u8, value: u8) {
        self.put(tag, &[value]);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// One parsed field.
pub type RawField = (u8, Vec<u8>);

/// Parse a field run into `(tag, bytes)` pairs, checking declared lengths
/// against the input.
pub fn parse_fields(mut input: &[u8]) -> Result<Vec<RawField>> {
    let mut out = Vec::new();
    while !input.is_empty() {
        if input.len() < 5 {
            return Err(DocError::BeyondLimit("truncated field header".into()));
        }
        let tag = input[0];
        let len = u32::from_be_bytes(input[1..5].try_into().expect("4 bytes")) as usize;
        input = &input[5..];
        if len > input.len() {
            return Err(DocError::BeyondLimit(format!(
                "field {tag} declares {len} bytes past end of input"
            )));
        }
        out.push((tag, input[..len].to_vec()));
        input = &input[len..];
    }
    Ok(out)
}

/// Field lookup over a parsed run, with set-membership enforcement.
pub struct FieldMap {
    fields: Vec<RawField>,
}

impl FieldMap {
    /// Parse and verify that only `allowed` tags occur.
    pub fn parse(input: &[u8], allowed: &[u8]) -> Result<Self> {
        let fields = parse_fields(input)?;
        for (tag, _) in &fields {
            if !allowed.contains(tag) {
                return Err(DocError::InvalidType(*tag));
            }
        }
        Ok(FieldMap { fields })
    }

    pub fn one(&self, tag: u8) -> Result<&[u8]> {
        self.opt(tag).ok_or(DocError::MissingField(tag))
    }

    pub fn opt(&self, tag: u8) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, b)| b.as_slice())
    }

    pub fn many(&self, tag: u8) -> impl Iterator<Item = &[u8]> {
        self.fields
            .iter()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, b)| b.as_slice())
    }
}

// -- value decoders ---------------------------------------------------------

pub fn uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|_| DocError::Malformed("uuid must be 16 bytes".into()))
}

pub fn date(bytes: &[u8]) -> Result<NaiveDate> {
    let text = std::str::from_utf8(bytes).map_err(|_| DocError::Malformed("date utf-8".into()))?;
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| DocError::Malformed(format!("date {text:?}")))
}

pub fn datetime(bytes: &[u8]) -> Result<DateTime<Utc>> {
    let text =
        std::str::from_utf8(bytes).map_err(|_| DocError::Malformed("datetime utf-8".into()))?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DocError::Malformed(format!("datetime {text:?}")))
}

pub fn string(bytes: &[u8], max: usize) -> Result<String> {
    if bytes.len() > max {
        return Err(DocError::BeyondLimit(format!(
            "string of {} bytes over limit {}",
            bytes.len(),
            max
        )));
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| DocError::Malformed("string utf-8".into()))
}

pub fn blob(bytes: &[u8], max: usize) -> Result<Vec<u8>> {
    if bytes.len() > max {
        return Err(DocError::BeyondLimit(format!(
            "blob of {} bytes over limit {}",
            bytes.len(),
            max
        )));
    }
    Ok(bytes.to_vec())
}

pub fn byte(bytes: &[u8]) -> Result<u8> {
    if bytes.len() != 1 {
        return Err(DocError::Malformed("expected single byte".into()));
    }
    Ok(bytes[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_roundtrip() {
        let id = Uuid::new_v4();
        let mut w = FieldWriter::new();
        w.put_uuid(tag::ID, &id);
        w.put_str(tag::SUBJECT, "hello");
        w.put_str(tag::SUBJECT, "again");
        let bytes = w.finish();

        let map = FieldMap::parse(&bytes, &[tag::ID, tag::SUBJECT]).unwrap();
        assert_eq!(uuid(map.one(tag::ID).unwrap()).unwrap(), id);
        let subjects: Vec<_> = map.many(tag::SUBJECT).collect();
        assert_eq!(subjects, vec![b"hello".as_slice(), b"again".as_slice()]);
    }

    #[test]
    fn unknown_tag_is_invalid_type() {
        let mut w = FieldWriter::new();
        w.put_str(tag::SUBJECT, "x");
        let bytes = w.finish();
        assert!(matches!(
            FieldMap::parse(&bytes, &[tag::ID]),
            Err(DocError::InvalidType(t)) if t == tag::SUBJECT
        ));
    }

    #[test]
    fn overlong_declared_length_is_beyond_limit() {
        let mut bytes = vec![tag::SUBJECT];
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        bytes.extend_from_slice(b"short");
        assert!(matches!(
            parse_fields(&bytes),
            Err(DocError::BeyondLimit(_))
        ));
    }

    #[test]
    fn truncated_header_is_beyond_limit() {
        assert!(matches!(
            parse_fields(&[tag::SUBJECT, 0, 0]),
            Err(DocError::BeyondLimit(_))
        ));
    }

    #[test]
    fn date_and_datetime_roundtrip() {
        let d = NaiveDate::from_ymd_opt(1815, 12, 10).unwrap();
        let mut w = FieldWriter::new();
        w.put_date(tag::BORN, &d);
        let bytes = w.finish();
        let map = FieldMap::parse(&bytes, &[tag::BORN]).unwrap();
        assert_eq!(date(map.one(tag::BORN).unwrap()).unwrap(), d);
    }

    #[test]
    fn string_limit_enforced() {
        assert!(matches!(
            string(&[b'a'; 65], 64),
            Err(DocError::BeyondLimit(_))
        ));
        assert_eq!(string(b"ok", 64).unwrap(), "ok");
    }
}
