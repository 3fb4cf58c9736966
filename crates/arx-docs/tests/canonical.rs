//! End-to-end document properties: stable canonical bytes, total
//! deserialization, and the full entity-setup scenario.

use arx_crypto::hash::generichash;
use arx_docs::types::entity::{Entity, Person};
use arx_docs::{AnyDocument, PrivatePortfolio};
use chrono::NaiveDate;

fn ada() -> Person {
    Person::create(
        "Ada",
        "L",
        &["Ada", "Mary"],
        "woman",
        NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(),
    )
}

#[test]
fn entity_setup_scenario() {
    let private = PrivatePortfolio::setup(Entity::Person(ada())).unwrap();

    // zero failures in the validate phase
    private.portfolio.validate_entity_and_keys().unwrap();

    // canonical bytes have a stable digest across serializations
    let bytes = private.portfolio.entity.serialize();
    let digest = generichash(None, 64, &bytes).unwrap();
    assert_eq!(
        generichash(None, 64, &private.portfolio.entity.serialize()).unwrap(),
        digest
    );

    // re-deserialization yields an equal entity
    let back = Entity::deserialize(&bytes).unwrap();
    assert_eq!(back, private.portfolio.entity);
    assert_eq!(back.serialize(), bytes);
}

#[test]
fn any_document_dispatch_roundtrips() {
    let private = PrivatePortfolio::setup(Entity::Person(ada())).unwrap();
    let docs: Vec<AnyDocument> = vec![
        private.portfolio.entity.clone().into(),
        AnyDocument::Keys(private.portfolio.keys[0].clone()),
        AnyDocument::PrivateKeys(private.privkeys.clone()),
        AnyDocument::Domain(private.domain.clone()),
    ];
    for doc in docs {
        let bytes = doc.serialize();
        let back = AnyDocument::deserialize(&bytes).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.serialize(), bytes);
    }
}

#[test]
fn garbage_bytes_never_panic() {
    assert!(AnyDocument::deserialize(&[]).is_err());
    assert!(AnyDocument::deserialize(&[0x00]).is_err());
    assert!(AnyDocument::deserialize(&[0xFE, 1, 2, 3]).is_err());
    // a valid kind tag followed by a truncated field header
    assert!(AnyDocument::deserialize(&[1, 1, 0, 0]).is_err());
}
