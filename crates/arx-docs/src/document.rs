//! The `Document` trait and the closed dispatch union.

use arx_crypto::sign::{sign_detached, verify_detached};
use arx_crypto::{CryptoError, SecretBytes};

use crate::error::{DocError, Result};
use crate::field::{tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::stamp::Stamp;
use crate::types::{
    domain::{Domain, Network, Node},
    entity::{Church, Ministry, Person},
    envelope::{Envelope, StoredLetter},
    keys::{Keys, PrivateKeys},
    messages::{Attachment, Instant, Mail, Note, ReportDoc, Share},
    profile::Profile,
    statements::{Revoked, Trusted, Verified},
};

/// A typed, immutable, signed record.
///
/// The canonical byte form (`kind tag || fields in ascending tag order`) is
/// used for storage, hashing and signing alike; the signable prefix is
/// `issuer || kind tag || fields excluding signatures`, which works out to
/// simply dropping the trailing signature fields since those sort last.
pub trait Document: Sized {
    const KIND: DocKind;

    fn stamp(&self) -> &Stamp;
    fn stamp_mut(&mut self) -> &mut Stamp;
    /// Body fields, tags strictly above the stamp head, ascending.
    fn write_body(&self, w: &mut FieldWriter);
    fn allowed_tags() -> &'static [u8];
    fn from_map(map: &FieldMap) -> Result<Self>;
    /// Type-specific rules; outcomes are recorded via [`crate::report`].
    fn validate(&self) -> Result<()>;
    /// Field tags an update may change (administrative tags are always
    /// changeable).
    fn changeable() -> &'static [u8] {
        &[]
    }

    fn serialize(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        self.stamp().write_head(&mut w);
        self.stamp().write_updated(&mut w);
        self.write_body(&mut w);
        self.stamp().write_signatures(&mut w);
        let mut out = vec![Self::KIND.tag()];
        out.extend(w.finish());
        out
    }

    fn signable(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        self.stamp().write_head(&mut w);
        self.stamp().write_updated(&mut w);
        self.write_body(&mut w);
        let mut out = Vec::with_capacity(17);
        out.extend_from_slice(self.stamp().issuer.as_bytes());
        out.push(Self::KIND.tag());
        out.extend(w.finish());
        out
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let Some((&kind_tag, fields)) = bytes.split_first() else {
            return Err(DocError::Malformed("empty document".into()));
        };
        if kind_tag != Self::KIND.tag() {
            return Err(DocError::InvalidType(kind_tag));
        }
        let map = FieldMap::parse(fields, Self::allowed_tags())?;
        Self::from_map(&map)
    }

    /// Sign, replacing any previous signatures.
    fn sign(&mut self, secret: &SecretBytes<64>) {
        let sig = sign_detached(secret, &self.signable());
        self.stamp_mut().signatures = vec![sig.to_vec()];
    }

    /// Verify the primary signature against a verify key.
    fn verify(&self, verify_key: &[u8]) -> Result<()> {
        let signable = self.signable();
        let sig = self
            .stamp()
            .signatures
            .first()
            .ok_or(CryptoError::CryptoFailure)?;
        verify_detached(verify_key, sig, &signable)?;
        Ok(())
    }
}

/// Documents addressed to another portfolio ("owned" by it).
pub trait Owned {
    fn owner(&self) -> uuid::Uuid;
}

macro_rules! owned {
    ($($ty:ty),* $(,)?) => {
        $(impl Owned for $ty {
            fn owner(&self) -> uuid::Uuid {
                self.owner
            }
        })*
    };
}

owned!(Trusted, Verified, Mail, Instant, ReportDoc, Share, Envelope);

/// Do the non-changeable fields of `old` and `new` agree byte-for-byte?
///
/// Both documents are flattened to their field runs; administrative tags
/// (expires, updated, signatures) and the type's changeable tags are masked
/// out before comparison.
pub fn immutable_fields_match<D: Document>(old: &D, new: &D) -> bool {
    let mask = |bytes: Vec<u8>| -> Option<Vec<(u8, Vec<u8>)>> {
        let fields = crate::field::parse_fields(&bytes[1..]).ok()?;
        Some(
            fields
                .into_iter()
                .filter(|(t, _)| {
                    *t != tag::EXPIRES
                        && *t != tag::UPDATED
                        && *t != tag::SIGNATURE
                        && !D::changeable().contains(t)
                })
                .collect(),
        )
    };
    match (mask(old.serialize()), mask(new.serialize())) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

macro_rules! any_document {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Closed tagged union over every document kind, the dispatch point
        /// for storage and replication.
        #[derive(Debug, Clone, PartialEq)]
        pub enum AnyDocument {
            $($variant($ty),)*
        }

        impl AnyDocument {
            pub fn kind(&self) -> DocKind {
                match self {
                    $(AnyDocument::$variant(_) => <$ty as Document>::KIND,)*
                }
            }

            pub fn stamp(&self) -> &Stamp {
                match self {
                    $(AnyDocument::$variant(doc) => doc.stamp(),)*
                }
            }

            pub fn serialize(&self) -> Vec<u8> {
                match self {
                    $(AnyDocument::$variant(doc) => doc.serialize(),)*
                }
            }

            pub fn validate(&self) -> Result<()> {
                match self {
                    $(AnyDocument::$variant(doc) => doc.validate(),)*
                }
            }

            pub fn verify(&self, verify_key: &[u8]) -> Result<()> {
                match self {
                    $(AnyDocument::$variant(doc) => doc.verify(verify_key),)*
                }
            }

            /// Vault file extension for this document.
            pub fn extension(&self) -> Option<&'static str> {
                self.kind().extension()
            }

            pub fn deserialize(bytes: &[u8]) -> Result<Self> {
                let Some((&kind_tag, _)) = bytes.split_first() else {
                    return Err(DocError::Malformed("empty document".into()));
                };
                Ok(match DocKind::from_tag(kind_tag)? {
                    $(k if k == <$ty as Document>::KIND =>
                        AnyDocument::$variant(<$ty>::deserialize(bytes)?),)*
                    other => return Err(DocError::InvalidType(other.tag())),
                })
            }
        }

        $(
            impl From<$ty> for AnyDocument {
                fn from(doc: $ty) -> Self {
                    AnyDocument::$variant(doc)
                }
            }
        )*
    };
}

impl From<crate::types::Entity> for AnyDocument {
    fn from(entity: crate::types::Entity) -> Self {
        match entity {
            crate::types::Entity::Person(p) => AnyDocument::Person(p),
            crate::types::Entity::Ministry(m) => AnyDocument::Ministry(m),
            crate::types::Entity::Church(c) => AnyDocument::Church(c),
        }
    }
}

any_document! {
    Person(Person),
    Ministry(Ministry),
    Church(Church),
    Keys(Keys),
    PrivateKeys(PrivateKeys),
    Profile(Profile),
    Domain(Domain),
    Node(Node),
    Network(Network),
    Trusted(Trusted),
    Verified(Verified),
    Revoked(Revoked),
    Mail(Mail),
    Note(Note),
    Instant(Instant),
    Report(ReportDoc),
    Share(Share),
    Envelope(Envelope),
    Attachment(Attachment),
    StoredLetter(StoredLetter),
}
