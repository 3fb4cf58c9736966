//! Portfolios: the document aggregate constituting one identity, plus the
//! accept/update/rotate policies guarding its evolution.

use uuid::Uuid;

use crate::document::Document;
use crate::error::{DocError, Result};
use crate::kind::DocKind;
use crate::report::{check_that, evaluate};
use crate::stamp::Stamp;
use crate::types::{
    Domain, Entity, Keys, Network, Node, PrivateKeys, Profile, Revoked, Trusted, Verified,
};

/// Public aggregate: everything other peers may hold about an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub entity: Entity,
    pub keys: Vec<Keys>,
    pub profile: Option<Profile>,
    pub trusted: Vec<Trusted>,
    pub verified: Vec<Verified>,
    pub revoked: Vec<Revoked>,
}

/// Private aggregate: the owner's side, including secrets and
/// infrastructure documents.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivatePortfolio {
    pub portfolio: Portfolio,
    pub privkeys: PrivateKeys,
    pub domain: Domain,
    pub nodes: Vec<Node>,
    pub network: Option<Network>,
}

impl Portfolio {
    pub fn id(&self) -> Uuid {
        self.entity.id()
    }

    /// The newest unexpired key set; falls back to the newest overall so a
    /// neglected portfolio can still be inspected.
    pub fn current_keys(&self) -> Result<&Keys> {
        self.keys
            .iter()
            .filter(|k| !k.stamp.is_expired())
            .max_by_key(|k| (k.stamp.effective_date(), k.stamp.id))
            .or_else(|| {
                self.keys
                    .iter()
                    .max_by_key(|k| (k.stamp.effective_date(), k.stamp.id))
            })
            .ok_or_else(|| DocError::Malformed("portfolio without keys".into()))
    }

    /// Verify a document against any key set the portfolio has published.
    pub fn verify_doc<D: Document>(&self, doc: &D) -> Result<()> {
        for keys in &self.keys {
            if doc.verify(&keys.verify).is_ok() {
                return Ok(());
            }
        }
        Err(DocError::Crypto(arx_crypto::CryptoError::CryptoFailure))
    }

    /// Entity and key-set invariants (the §validate phase; pure).
    pub fn validate_entity_and_keys(&self) -> Result<()> {
        evaluate("entity-and-keys", || {
            self.entity.validate()?;
            self.verify_entity()?;
            check_that("portfolio-keys-nonempty", !self.keys.is_empty(), "no keys")?;
            check_that(
                "portfolio-keys-current",
                self.keys.iter().any(|k| !k.stamp.is_expired()),
                "all keys expired",
            )?;
            for keys in &self.keys {
                keys.validate()?;
                keys.verify_self()?;
                check_that(
                    "portfolio-keys-issuer",
                    keys.stamp.issuer == self.id(),
                    "key set issued by someone else",
                )?;
            }
            check_that(
                "portfolio-keys-distinct",
                distinct_publics(&self.keys),
                "duplicate public key",
            )?;
            Ok(())
        })
    }

    fn verify_entity(&self) -> Result<()> {
        for keys in &self.keys {
            if self.entity.verify(&keys.verify).is_ok() {
                return Ok(());
            }
        }
        Err(DocError::Crypto(arx_crypto::CryptoError::CryptoFailure))
    }

    /// A document claimed to be issued by this portfolio: issuer matches,
    /// content validates, signature chains to a published key.
    pub fn validate_issued<D: Document>(&self, doc: &D) -> Result<()> {
        evaluate("issued", || {
            doc.validate()?;
            check_that(
                "issued-by-entity",
                doc.stamp().issuer == self.id(),
                "issuer is not this portfolio",
            )?;
            self.verify_doc(doc)?;
            Ok(())
        })
    }

    /// A document another portfolio issued for this one: content validates,
    /// this portfolio is the owner, and the signature chains to the
    /// issuer's published keys.
    pub fn validate_owned<D: Document + crate::document::Owned>(
        &self,
        issuer: &Portfolio,
        doc: &D,
    ) -> Result<()> {
        evaluate("owned", || {
            doc.validate()?;
            check_that(
                "owned-owner",
                doc.owner() == self.id(),
                "document owned by someone else",
            )?;
            check_that(
                "owned-issuer",
                doc.stamp().issuer == issuer.id(),
                "document issued by someone else",
            )?;
            issuer.verify_doc(doc)?;
            Ok(())
        })
    }

    /// An envelope this portfolio (as sender) claims to have posted.
    pub fn validate_envelope(&self, envelope: &crate::types::Envelope) -> Result<()> {
        evaluate("envelope", || {
            envelope.validate()?;
            check_that(
                "envelope-issuer",
                envelope.stamp.issuer == self.id(),
                "envelope not issued by sender",
            )?;
            self.verify_doc(envelope)?;
            Ok(())
        })
    }

    /// A mail this portfolio (as sender) claims to have written.
    pub fn validate_message(&self, mail: &crate::types::Mail) -> Result<()> {
        evaluate("message", || {
            mail.validate()?;
            check_that(
                "message-issuer",
                mail.stamp.issuer == self.id(),
                "mail not issued by sender",
            )?;
            self.verify_doc(mail)?;
            Ok(())
        })
    }

    /// Was this statement id revoked at some point?
    pub fn is_revoked(&self, statement_id: &Uuid) -> bool {
        self.revoked.iter().any(|r| r.statement == *statement_id)
    }

    /// Accept a Trusted statement; additive and idempotent per
    /// `(issuer, owner)` with the latest valid one winning.
    pub fn accept_trusted(&mut self, statement: Trusted) -> Result<()> {
        self.validate_issued(&statement)?;
        if self.is_revoked(&statement.stamp.id) {
            return Err(DocError::Malformed("statement id was revoked".into()));
        }
        upsert_statement(&mut self.trusted, statement, |s| (s.stamp.issuer, s.owner), |s| &s.stamp);
        Ok(())
    }

    /// Accept a Verified statement; same semantics as [`accept_trusted`].
    pub fn accept_verified(&mut self, statement: Verified) -> Result<()> {
        self.validate_issued(&statement)?;
        if self.is_revoked(&statement.stamp.id) {
            return Err(DocError::Malformed("statement id was revoked".into()));
        }
        upsert_statement(&mut self.verified, statement, |s| (s.stamp.issuer, s.owner), |s| &s.stamp);
        Ok(())
    }

    /// Accept a revocation: it must reference an earlier statement by this
    /// same issuer. The referenced statement is dropped; the id stays
    /// refused forever. Returns the dropped statement's kind.
    pub fn accept_revoked(&mut self, revoked: Revoked) -> Result<DocKind> {
        self.validate_issued(&revoked)?;
        let reference = revoked.statement;
        let kind = if let Some(pos) = self.trusted.iter().position(|s| s.stamp.id == reference) {
            self.trusted.remove(pos);
            DocKind::Trusted
        } else if let Some(pos) = self.verified.iter().position(|s| s.stamp.id == reference) {
            self.verified.remove(pos);
            DocKind::Verified
        } else if self.is_revoked(&reference) {
            // revoking twice is a no-op, keep the original revocation
            return Ok(DocKind::Revoked);
        } else {
            return Err(DocError::Malformed(
                "revocation references no statement of this portfolio".into(),
            ));
        };
        self.revoked.push(revoked);
        Ok(kind)
    }

    /// Update the entity document: strictly newer, immutable fields intact,
    /// signature valid under current keys.
    pub fn update_entity(&mut self, newer: Entity) -> Result<()> {
        evaluate("update-entity", || {
            newer.validate()?;
            check_that(
                "update-same-entity",
                newer.id() == self.id(),
                "entity id changed",
            )?;
            check_that(
                "update-monotone",
                newer.stamp().effective_date() > self.entity.stamp().effective_date(),
                "update is not newer",
            )?;
            check_that(
                "update-immutable-fields",
                self.entity.immutable_match(&newer),
                "immutable field changed",
            )?;
            let current = self.current_keys()?;
            newer.verify(&current.verify)?;
            Ok(())
        })?;
        self.entity = newer;
        Ok(())
    }

    /// Update (or set) the profile document.
    pub fn update_profile(&mut self, newer: Profile) -> Result<()> {
        evaluate("update-profile", || {
            newer.validate()?;
            check_that(
                "profile-issuer",
                newer.stamp.issuer == self.id(),
                "profile issued by someone else",
            )?;
            if let Some(current) = &self.profile {
                check_that(
                    "profile-monotone",
                    newer.stamp.effective_date() >= current.stamp.effective_date(),
                    "older profile",
                )?;
            }
            self.verify_doc(&newer)?;
            Ok(())
        })?;
        self.profile = Some(newer);
        Ok(())
    }
}

impl PrivatePortfolio {
    /// Build a fresh private portfolio around an unsigned entity: generate
    /// the first key set, self-sign everything, carve out a domain.
    pub fn setup(mut entity: Entity) -> Result<Self> {
        let id = entity.stamp().id;
        entity.stamp_mut().issuer = id;
        let (keys, privkeys, pair) = crate::types::keys::generate_key_set(id);
        entity.sign(&pair.secret);

        let mut domain = Domain::create(id);
        domain.sign(&pair.secret);

        let private = PrivatePortfolio {
            portfolio: Portfolio {
                entity,
                keys: vec![keys],
                profile: None,
                trusted: Vec::new(),
                verified: Vec::new(),
                revoked: Vec::new(),
            },
            privkeys,
            domain,
            nodes: Vec::new(),
            network: None,
        };
        private.portfolio.validate_entity_and_keys()?;
        Ok(private)
    }

    pub fn id(&self) -> Uuid {
        self.portfolio.id()
    }

    /// The signing pair reconstructed from the private keys.
    pub fn sign_pair(&self) -> Result<arx_crypto::sign::SignKeypair> {
        self.privkeys.sign_keypair()
    }

    /// Issue and attach a signed document in one step.
    pub fn issue<D: Document>(&self, doc: &mut D) -> Result<()> {
        doc.stamp_mut().issuer = self.id();
        doc.sign(&self.sign_pair()?.secret);
        Ok(())
    }

    /// Rotate to a new key set. The new Keys document must carry a
    /// signature chaining to the current keys and one by itself; the
    /// private half is swapped atomically with the public half.
    pub fn rotate_keys(&mut self, new_keys: Keys, new_privkeys: PrivateKeys) -> Result<()> {
        evaluate("newkeys", || {
            new_keys.validate()?;
            new_privkeys.validate()?;
            check_that(
                "newkeys-issuer",
                new_keys.stamp.issuer == self.id() && new_privkeys.stamp.issuer == self.id(),
                "rotation for another entity",
            )?;
            check_that(
                "newkeys-dual-signed",
                new_keys.stamp.signatures.len() == 2,
                "rotation needs the dual signature",
            )?;
            new_keys.verify_self()?;
            let current_verify = self.sign_pair()?.verify;
            new_keys.verify_chained(&current_verify)?;
            check_that(
                "newkeys-fresh-public",
                !self
                    .portfolio
                    .keys
                    .iter()
                    .any(|k| k.public == new_keys.public || k.verify == new_keys.verify),
                "rotation reuses a published key",
            )?;
            check_that(
                "newkeys-matching-halves",
                matching_halves(&new_keys, &new_privkeys),
                "public and private halves disagree",
            )?;
            Ok(())
        })?;
        self.portfolio.keys.push(new_keys);
        self.privkeys = new_privkeys;
        Ok(())
    }

    /// Validate a node against this portfolio (the §validate phase; pure).
    pub fn validate_node(&self, node: &Node) -> Result<()> {
        evaluate("node", || {
            node.validate()?;
            check_that(
                "node-issuer",
                node.stamp.issuer == self.id(),
                "node issued by someone else",
            )?;
            check_that(
                "node-in-domain",
                node.domain == self.domain.stamp.id,
                "node outside the portfolio domain",
            )?;
            self.portfolio.verify_doc(node)?;
            Ok(())
        })
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        self.validate_node(&node)?;
        if self.nodes.iter().any(|n| n.stamp.id == node.stamp.id) {
            return Ok(()); // idempotent
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Install the published network map; every host must resolve to one of
    /// the portfolio's nodes.
    pub fn set_network(&mut self, network: Network) -> Result<()> {
        evaluate("network", || {
            network.validate()?;
            check_that(
                "network-issuer",
                network.stamp.issuer == self.id(),
                "network issued by someone else",
            )?;
            check_that(
                "network-domain",
                network.domain == self.domain.stamp.id,
                "network outside the portfolio domain",
            )?;
            for host in &network.hosts {
                check_that(
                    "network-host-resolves",
                    self.nodes.iter().any(|n| n.stamp.id == host.node),
                    "host references unknown node",
                )?;
            }
            self.portfolio.verify_doc(&network)?;
            Ok(())
        })?;
        self.network = Some(network);
        Ok(())
    }

    /// Issue a rotation key set dual-signed by the current and the new
    /// secret, ready for [`rotate_keys`].
    pub fn forge_key_rotation(&self) -> Result<(Keys, PrivateKeys)> {
        let (mut keys, mut privkeys, new_pair) =
            crate::types::keys::generate_key_set(self.id());
        let old_pair = self.sign_pair()?;
        let self_sig = arx_crypto::sign::sign_detached(&new_pair.secret, &keys.signable());
        let chain_sig = arx_crypto::sign::sign_detached(&old_pair.secret, &keys.signable());
        keys.stamp.signatures = vec![self_sig.to_vec(), chain_sig.to_vec()];
        privkeys.sign(&new_pair.secret);
        Ok((keys, privkeys))
    }
}

fn distinct_publics(keys: &[Keys]) -> bool {
    let mut seen: Vec<&[u8]> = Vec::with_capacity(keys.len());
    for k in keys {
        if seen.contains(&k.public.as_slice()) {
            return false;
        }
        seen.push(&k.public);
    }
    true
}

fn matching_halves(keys: &Keys, privkeys: &PrivateKeys) -> bool {
    let Ok(pair) = arx_crypto::sign::SignKeypair::from_seed(&privkeys.seed) else {
        return false;
    };
    let Ok(box_pair) = arx_crypto::box_::BoxKeypair::from_secret(&privkeys.secret) else {
        return false;
    };
    pair.verify.as_slice() == keys.verify && box_pair.public.as_slice() == keys.public
}

fn upsert_statement<S, K: PartialEq>(
    list: &mut Vec<S>,
    statement: S,
    key: impl Fn(&S) -> K,
    stamp: impl Fn(&S) -> &Stamp,
) {
    let statement_key = key(&statement);
    if let Some(existing) = list.iter_mut().find(|s| key(s) == statement_key) {
        if stamp(&statement).effective_date() >= stamp(existing).effective_date() {
            *existing = statement;
        }
    } else {
        list.push(statement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ada() -> PrivatePortfolio {
        let person = crate::types::entity::Person::create(
            "Ada",
            "L",
            &["Ada", "Mary"],
            "woman",
            NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(),
        );
        PrivatePortfolio::setup(Entity::Person(person)).unwrap()
    }

    #[test]
    fn setup_produces_valid_portfolio() {
        let private = ada();
        private.portfolio.validate_entity_and_keys().unwrap();
        assert_eq!(private.portfolio.keys.len(), 1);
        assert_eq!(private.domain.stamp.issuer, private.id());
    }

    #[test]
    fn statement_acceptance_is_idempotent() {
        let issuer = ada();
        let subject = ada();
        let mut home = issuer.portfolio.clone();
        let mut statement = Trusted::create(issuer.id(), subject.id());
        issuer.issue(&mut statement).unwrap();
        home.accept_trusted(statement.clone()).unwrap();
        let before = home.trusted.clone();
        home.accept_trusted(statement).unwrap();
        assert_eq!(home.trusted, before);
    }

    #[test]
    fn owned_statements_check_both_parties() {
        let issuer = ada();
        let subject = ada();
        let mut statement = Trusted::create(issuer.id(), subject.id());
        issuer.issue(&mut statement).unwrap();

        subject
            .portfolio
            .validate_owned(&issuer.portfolio, &statement)
            .unwrap();
        // a third party is neither owner nor issuer
        let stranger = ada();
        assert!(stranger
            .portfolio
            .validate_owned(&issuer.portfolio, &statement)
            .is_err());
        assert!(subject
            .portfolio
            .validate_owned(&stranger.portfolio, &statement)
            .is_err());
    }

    #[test]
    fn revoke_is_monotone() {
        let issuer = ada();
        let mut home = issuer.portfolio.clone();
        let mut statement = Trusted::create(issuer.id(), Uuid::new_v4());
        issuer.issue(&mut statement).unwrap();
        home.accept_trusted(statement.clone()).unwrap();

        let mut revoked = Revoked::create(issuer.id(), statement.stamp.id);
        issuer.issue(&mut revoked).unwrap();
        assert_eq!(home.accept_revoked(revoked).unwrap(), DocKind::Trusted);
        assert!(home.trusted.is_empty());

        // the revoked id is refused forever
        assert!(home.accept_trusted(statement).is_err());
    }

    #[test]
    fn revoking_foreign_statement_fails() {
        let issuer = ada();
        let mut home = issuer.portfolio.clone();
        let mut revoked = Revoked::create(issuer.id(), Uuid::new_v4());
        issuer.issue(&mut revoked).unwrap();
        assert!(home.accept_revoked(revoked).is_err());
    }

    #[test]
    fn key_rotation_round() {
        let mut private = ada();
        let old_verify = private.portfolio.current_keys().unwrap().verify.clone();
        let (keys, privkeys) = private.forge_key_rotation().unwrap();
        private.rotate_keys(keys, privkeys).unwrap();
        assert_eq!(private.portfolio.keys.len(), 2);
        let current = private.portfolio.current_keys().unwrap();
        assert_ne!(current.verify, old_verify);
        // new signatures come from the new pair
        let mut note = crate::types::messages::Note {
            stamp: Stamp::new(private.id(), DocKind::Note),
            body: "after rotation".into(),
        };
        private.issue(&mut note).unwrap();
        private.portfolio.validate_issued(&note).unwrap();
    }

    #[test]
    fn rotation_without_chain_signature_fails() {
        let mut private = ada();
        let (keys, privkeys, _) = crate::types::keys::generate_key_set(private.id());
        // only self-signed, no chain to the current secret
        assert!(private.rotate_keys(keys, privkeys).is_err());
    }

    #[test]
    fn update_entity_enforces_monotonicity_and_immutables() {
        let mut private = ada();
        let pair = private.sign_pair().unwrap();

        let Entity::Person(person) = private.portfolio.entity.clone() else {
            unreachable!()
        };

        // not newer -> refused
        let mut same = person.clone();
        same.stamp.updated = None;
        let mut same_entity = Entity::Person(same);
        same_entity.sign(&pair.secret);
        assert!(private.portfolio.update_entity(same_entity).is_err());

        // newer with changed family name -> accepted
        let mut renamed = person.clone();
        renamed.family_name = "Lovelace".into();
        renamed.stamp.updated = Some(renamed.stamp.created + chrono::Months::new(1));
        let mut renamed_entity = Entity::Person(renamed);
        renamed_entity.sign(&pair.secret);
        private.portfolio.update_entity(renamed_entity).unwrap();

        // newer but changed birth date -> refused
        let Entity::Person(current) = private.portfolio.entity.clone() else {
            unreachable!()
        };
        let mut reborn = current.clone();
        reborn.born = NaiveDate::from_ymd_opt(1820, 1, 1).unwrap();
        reborn.stamp.updated = Some(current.stamp.effective_date() + chrono::Months::new(1));
        let mut reborn_entity = Entity::Person(reborn);
        reborn_entity.sign(&pair.secret);
        assert!(private.portfolio.update_entity(reborn_entity).is_err());
    }

    #[test]
    fn nodes_and_network() {
        let mut private = ada();
        let mut node = Node {
            stamp: Stamp::new(private.id(), DocKind::Node),
            domain: private.domain.stamp.id,
            role: "server".into(),
            device: "vps".into(),
            serial: "SN-7".into(),
            hostname: vec!["relay.example.org".into()],
            ip: vec!["192.0.2.1".into()],
        };
        private.issue(&mut node).unwrap();
        private.add_node(node.clone()).unwrap();

        let mut network = Network {
            stamp: Stamp::new(private.id(), DocKind::Network),
            domain: private.domain.stamp.id,
            hosts: vec![crate::types::Host {
                node: node.stamp.id,
                hostname: node.hostname.clone(),
                ip: node.ip.clone(),
            }],
        };
        private.issue(&mut network).unwrap();
        private.set_network(network).unwrap();

        // a host pointing at an unknown node is refused
        let mut bad = Network {
            stamp: Stamp::new(private.id(), DocKind::Network),
            domain: private.domain.stamp.id,
            hosts: vec![crate::types::Host {
                node: Uuid::new_v4(),
                hostname: vec![],
                ip: vec![],
            }],
        };
        private.issue(&mut bad).unwrap();
        assert!(private.set_network(bad).is_err());
    }

    #[test]
    fn foreign_node_rejected() {
        let mut private = ada();
        let other = ada();
        let mut node = Node {
            stamp: Stamp::new(other.id(), DocKind::Node),
            domain: other.domain.stamp.id,
            role: "client".into(),
            device: "laptop".into(),
            serial: "SN-9".into(),
            hostname: vec![],
            ip: vec![],
        };
        other.issue(&mut node).unwrap();
        assert!(private.add_node(node).is_err());
    }
}
