//! Envelopes: the signed wrapper that carries a sealed message through zero
//! or more routing hops, and the stored-letter evidence copy.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{DocError, Result};
use crate::field::{self, parse_fields, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;
use crate::types::messages::Mail;

use arx_crypto::sign::{sign_detached, verify_detached};
use arx_crypto::SecretBytes;

const SEALED_MAX: usize = 256 * 1024;

/// Routing operation recorded in an envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderOp {
    Send = 1,
    Route = 2,
    Receive = 3,
}

impl HeaderOp {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(HeaderOp::Send),
            2 => Ok(HeaderOp::Route),
            3 => Ok(HeaderOp::Receive),
            other => Err(DocError::InvalidType(other)),
        }
    }
}

/// One hop record. Signed by the hop over the envelope id, operation and
/// timestamp, so headers can be appended without re-signing the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvHeader {
    pub op: HeaderOp,
    pub issuer: Uuid,
    pub timestamp: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl EnvHeader {
    fn signable(envelope_id: &Uuid, op: HeaderOp, issuer: &Uuid, at: &DateTime<Utc>) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(envelope_id.as_bytes());
        out.extend_from_slice(issuer.as_bytes());
        out.push(op as u8);
        out.extend_from_slice(
            at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true).as_bytes(),
        );
        out
    }

    pub fn signed(
        envelope_id: &Uuid,
        op: HeaderOp,
        issuer: Uuid,
        secret: &SecretBytes<64>,
    ) -> Self {
        let timestamp = crate::now_utc();
        let signature =
            sign_detached(secret, &Self::signable(envelope_id, op, &issuer, &timestamp)).to_vec();
        EnvHeader {
            op,
            issuer,
            timestamp,
            signature,
        }
    }

    pub fn verify(&self, envelope_id: &Uuid, verify_key: &[u8]) -> Result<()> {
        verify_detached(
            verify_key,
            &self.signature,
            &Self::signable(envelope_id, self.op, &self.issuer, &self.timestamp),
        )?;
        Ok(())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_uuid(tag::ISSUER, &self.issuer);
        w.put_u8(tag::OP, self.op as u8);
        w.put_datetime(tag::TIMESTAMP, &self.timestamp);
        w.put(tag::SIGNATURE, &self.signature);
        w.finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let fields = parse_fields(bytes)?;
        let mut op = None;
        let mut issuer = None;
        let mut timestamp = None;
        let mut signature = None;
        for (t, value) in &fields {
            match *t {
                tag::OP => op = Some(HeaderOp::from_byte(field::byte(value)?)?),
                tag::ISSUER => issuer = Some(field::uuid(value)?),
                tag::TIMESTAMP => timestamp = Some(field::datetime(value)?),
                tag::SIGNATURE => signature = Some(field::blob(value, 64)?),
                other => return Err(DocError::InvalidType(other)),
            }
        }
        Ok(EnvHeader {
            op: op.ok_or(DocError::MissingField(tag::OP))?,
            issuer: issuer.ok_or(DocError::MissingField(tag::ISSUER))?,
            timestamp: timestamp.ok_or(DocError::MissingField(tag::TIMESTAMP))?,
            signature: signature.ok_or(DocError::MissingField(tag::SIGNATURE))?,
        })
    }
}

/// The wrapper itself. The envelope signature covers everything except the
/// `headers` field, which grows en route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub stamp: Stamp,
    pub owner: Uuid,
    pub sealed: Vec<u8>,
    pub posted: DateTime<Utc>,
    pub headers: Vec<EnvHeader>,
}

impl Document for Envelope {
    const KIND: DocKind = DocKind::Envelope;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::OWNER, &self.owner);
        w.put(tag::SEALED, &self.sealed);
        w.put_datetime(tag::POSTED, &self.posted);
        for header in &self.headers {
            w.put(tag::HEADERS, &header.to_bytes());
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
            tag::SEALED,
            tag::POSTED,
            tag::HEADERS,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Envelope {
            stamp: Stamp::from_fields(map)?,
            owner: field::uuid(map.one(tag::OWNER)?)?,
            sealed: field::blob(map.one(tag::SEALED)?, SEALED_MAX)?,
            posted: field::datetime(map.one(tag::POSTED)?)?,
            headers: map
                .many(tag::HEADERS)
                .map(EnvHeader::from_bytes)
                .collect::<Result<_>>()?,
        })
    }

    // The envelope signature excludes headers: hops append to the envelope
    // after it is sealed and signed.
    fn signable(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        self.stamp.write_head(&mut w);
        self.stamp.write_updated(&mut w);
        w.put_uuid(tag::OWNER, &self.owner);
        w.put(tag::SEALED, &self.sealed);
        w.put_datetime(tag::POSTED, &self.posted);
        let mut out = Vec::with_capacity(17);
        out.extend_from_slice(self.stamp.issuer.as_bytes());
        out.push(Self::KIND.tag());
        out.extend(w.finish());
        out
    }

    fn validate(&self) -> Result<()> {
        check("envelope-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("envelope-owner", !self.owner.is_nil(), "envelope without owner")?;
        check_that(
            "envelope-sealed",
            !self.sealed.is_empty(),
            "envelope without payload",
        )?;
        check("envelope-headers", self.check_headers())?;
        Ok(())
    }
}

impl Envelope {
    /// Header ordering invariants: first is SEND, at most one RECEIVE and it
    /// is last, timestamps never decrease.
    fn check_headers(&self) -> Result<()> {
        if let Some(first) = self.headers.first() {
            if first.op != HeaderOp::Send {
                return Err(DocError::Malformed("first header must be SEND".into()));
            }
        }
        let receives = self
            .headers
            .iter()
            .filter(|h| h.op == HeaderOp::Receive)
            .count();
        if receives > 1 {
            return Err(DocError::Malformed("more than one RECEIVE header".into()));
        }
        if receives == 1 && self.headers.last().map(|h| h.op) != Some(HeaderOp::Receive) {
            return Err(DocError::Malformed("RECEIVE header must be last".into()));
        }
        for pair in self.headers.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(DocError::Malformed(
                    "header timestamps must not decrease".into(),
                ));
            }
        }
        Ok(())
    }

    /// Append a signed hop header. ROUTE after RECEIVE is refused.
    pub fn add_header(
        &mut self,
        op: HeaderOp,
        issuer: Uuid,
        secret: &SecretBytes<64>,
    ) -> Result<()> {
        if self
            .headers
            .iter()
            .any(|h| h.op == HeaderOp::Receive)
        {
            return Err(DocError::Malformed(
                "envelope already received; no further hops".into(),
            ));
        }
        if self.headers.is_empty() && op != HeaderOp::Send {
            return Err(DocError::Malformed("first header must be SEND".into()));
        }
        self.headers
            .push(EnvHeader::signed(&self.stamp.id, op, issuer, secret));
        Ok(())
    }
}

/// Evidence copy written to the cache after a successful open: the envelope
/// as it arrived plus the message it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLetter {
    pub stamp: Stamp,
    pub envelope: Envelope,
    pub message: Mail,
}

impl StoredLetter {
    pub fn create(recipient: Uuid, envelope: Envelope, message: Mail) -> Self {
        StoredLetter {
            stamp: Stamp::new(recipient, DocKind::StoredLetter),
            envelope,
            message,
        }
    }
}

impl Document for StoredLetter {
    const KIND: DocKind = DocKind::StoredLetter;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put(tag::ENVELOPE, &self.envelope.serialize());
        w.put(tag::MESSAGE, &self.message.serialize());
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::ENVELOPE,
            tag::MESSAGE,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(StoredLetter {
            stamp: Stamp::from_fields(map)?,
            envelope: Envelope::deserialize(map.one(tag::ENVELOPE)?)?,
            message: Mail::deserialize(map.one(tag::MESSAGE)?)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("letter-expiry", self.stamp.check_expiry(Self::KIND))?;
        self.envelope.validate()?;
        self.message.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_crypto::sign::SignKeypair;

    fn envelope(issuer: Uuid, owner: Uuid) -> Envelope {
        Envelope {
            stamp: Stamp::new(issuer, DocKind::Envelope),
            owner,
            sealed: vec![0xEE; 48],
            posted: crate::now_utc(),
            headers: Vec::new(),
        }
    }

    #[test]
    fn roundtrip_with_headers() {
        let keys = SignKeypair::generate();
        let issuer = Uuid::new_v4();
        let mut env = envelope(issuer, Uuid::new_v4());
        env.add_header(HeaderOp::Send, issuer, &keys.secret).unwrap();
        env.add_header(HeaderOp::Route, Uuid::new_v4(), &keys.secret)
            .unwrap();
        let bytes = env.serialize();
        let back = Envelope::deserialize(&bytes).unwrap();
        assert_eq!(back, env);
        back.headers[0].verify(&env.stamp.id, &keys.verify).unwrap();
    }

    #[test]
    fn signature_survives_header_appends() {
        let keys = SignKeypair::generate();
        let issuer = Uuid::new_v4();
        let mut env = envelope(issuer, Uuid::new_v4());
        env.sign(&keys.secret);
        env.add_header(HeaderOp::Send, issuer, &keys.secret).unwrap();
        env.add_header(HeaderOp::Route, Uuid::new_v4(), &keys.secret)
            .unwrap();
        env.verify(&keys.verify).unwrap();
    }

    #[test]
    fn first_header_must_be_send() {
        let keys = SignKeypair::generate();
        let mut env = envelope(Uuid::new_v4(), Uuid::new_v4());
        assert!(env
            .add_header(HeaderOp::Route, Uuid::new_v4(), &keys.secret)
            .is_err());
    }

    #[test]
    fn no_hops_after_receive() {
        let keys = SignKeypair::generate();
        let issuer = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let mut env = envelope(issuer, owner);
        env.add_header(HeaderOp::Send, issuer, &keys.secret).unwrap();
        env.add_header(HeaderOp::Receive, owner, &keys.secret).unwrap();
        assert!(env
            .add_header(HeaderOp::Route, Uuid::new_v4(), &keys.secret)
            .is_err());
    }

    #[test]
    fn misordered_headers_fail_validation() {
        let keys = SignKeypair::generate();
        let issuer = Uuid::new_v4();
        let mut env = envelope(issuer, Uuid::new_v4());
        env.add_header(HeaderOp::Send, issuer, &keys.secret).unwrap();
        env.add_header(HeaderOp::Receive, env.owner, &keys.secret)
            .unwrap();
        // force a RECEIVE into the middle
        env.headers
            .push(EnvHeader::signed(&env.stamp.id, HeaderOp::Route, issuer, &keys.secret));
        assert!(env.check_headers().is_err());
    }

    #[test]
    fn stored_letter_roundtrip() {
        let keys = SignKeypair::generate();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut env = envelope(a, b);
        env.add_header(HeaderOp::Send, a, &keys.secret).unwrap();
        let mail = Mail::compose(a, b, "subject", "body");
        let letter = StoredLetter::create(b, env, mail);
        let bytes = letter.serialize();
        assert_eq!(StoredLetter::deserialize(&bytes).unwrap(), letter);
    }
}
