//! Portfolio bundle files: the out-of-band identity exchange format.
//!
//! Layout: `magic || ( u32 be length || document bytes )*`.

use anyhow::{bail, Result};

use arx_docs::AnyDocument;

const MAGIC: &[u8] = b"ARXPFL1\n";
/// Sanity ceiling for one bundled document.
const DOC_MAX: usize = 1 << 20;

pub fn encode(docs: &[AnyDocument]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + docs.len() * 256);
    out.extend_from_slice(MAGIC);
    for doc in docs {
        let bytes = doc.serialize();
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&bytes);
    }
    out
}

pub fn decode(input: &[u8]) -> Result<Vec<AnyDocument>> {
    let Some(mut rest) = input.strip_prefix(MAGIC) else {
        bail!("not a portfolio bundle");
    };
    let mut docs = Vec::new();
    while !rest.is_empty() {
        if rest.len() < 4 {
            bail!("truncated bundle");
        }
        let len = u32::from_be_bytes(rest[..4].try_into().expect("4 bytes")) as usize;
        rest = &rest[4..];
        if len > DOC_MAX || len > rest.len() {
            bail!("bundle entry of {len} bytes is out of bounds");
        }
        docs.push(AnyDocument::deserialize(&rest[..len])?);
        rest = &rest[len..];
    }
    if docs.is_empty() {
        bail!("empty bundle");
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_docs::types::entity::{Entity, Person};
    use arx_docs::PrivatePortfolio;
    use chrono::NaiveDate;

    fn docs() -> Vec<AnyDocument> {
        let person = Person::create(
            "Ada",
            "L",
            &["Ada"],
            "woman",
            NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(),
        );
        let private = PrivatePortfolio::setup(Entity::Person(person)).unwrap();
        let mut out: Vec<AnyDocument> = vec![private.portfolio.entity.clone().into()];
        out.extend(
            private
                .portfolio
                .keys
                .iter()
                .cloned()
                .map(AnyDocument::Keys),
        );
        out
    }

    #[test]
    fn roundtrip() {
        let docs = docs();
        let bytes = encode(&docs);
        assert_eq!(decode(&bytes).unwrap(), docs);
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode(b"nonsense").is_err());
        assert!(decode(MAGIC).is_err());
        let mut truncated = encode(&docs());
        truncated.truncate(truncated.len() - 3);
        assert!(decode(&truncated).is_err());
    }
}
