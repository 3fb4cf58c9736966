//! Portfolio persistence in the archive, plus the per-archive document
//! cache breaking the portfolio ↔ statement reference cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use uuid::Uuid;

use arx_archive::{ArchiveFs, FileOptions, Query, RemoveMode};

use crate::document::{AnyDocument, Document};
use crate::error::{DocError, Result};
use crate::kind::DocKind;
use crate::paths;
use crate::portfolio::{Portfolio, PrivatePortfolio};
use crate::types::{Domain, Entity, Keys, Network, Node, PrivateKeys, Profile, Revoked, Trusted, Verified};

/// Weak-reference cache of deserialized documents, keyed by id. Documents
/// are indexed by UUID on disk; in memory, holders keep `Arc`s and the
/// cache only keeps them alive as long as someone else does.
#[derive(Default)]
pub struct DocCache {
    map: Mutex<HashMap<Uuid, Weak<AnyDocument>>>,
}

impl DocCache {
    pub fn new() -> Self {
        DocCache::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<AnyDocument>> {
        self.map.lock().expect("cache lock").get(id)?.upgrade()
    }

    pub fn put(&self, doc: AnyDocument) -> Arc<AnyDocument> {
        let id = doc.stamp().id;
        let arc = Arc::new(doc);
        let mut map = self.map.lock().expect("cache lock");
        map.retain(|_, weak| weak.strong_count() > 0);
        map.insert(id, Arc::downgrade(&arc));
        arc
    }
}

/// Build a public portfolio from a bag of documents (a vault directory or
/// an exchanged bundle). Exactly one entity document is required.
pub fn assemble_portfolio<'a>(
    docs: impl Iterator<Item = &'a AnyDocument>,
) -> Result<Portfolio> {
    let mut entity_doc = None;
    let mut keys: Vec<Keys> = Vec::new();
    let mut profile: Option<Profile> = None;
    let mut trusted = Vec::new();
    let mut verified = Vec::new();
    let mut revoked = Vec::new();
    for doc in docs {
        match doc {
            AnyDocument::Person(p) => entity_doc = Some(Entity::Person(p.clone())),
            AnyDocument::Ministry(m) => entity_doc = Some(Entity::Ministry(m.clone())),
            AnyDocument::Church(c) => entity_doc = Some(Entity::Church(c.clone())),
            AnyDocument::Keys(k) => keys.push(k.clone()),
            AnyDocument::Profile(p) => profile = Some(p.clone()),
            AnyDocument::Trusted(t) => trusted.push(t.clone()),
            AnyDocument::Verified(v) => verified.push(v.clone()),
            AnyDocument::Revoked(r) => revoked.push(r.clone()),
            _ => {}
        }
    }
    Ok(Portfolio {
        entity: entity_doc.ok_or_else(|| DocError::Malformed("no entity document".into()))?,
        keys,
        profile,
        trusted,
        verified,
        revoked,
    })
}

/// Reads and writes portfolios under `/portfolios/<entity>/`.
pub struct PortfolioStore<'a> {
    fs: &'a ArchiveFs,
    cache: &'a DocCache,
}

impl<'a> PortfolioStore<'a> {
    pub fn new(fs: &'a ArchiveFs, cache: &'a DocCache) -> Self {
        PortfolioStore { fs, cache }
    }

    async fn ensure_dirs(&self, entity: &Uuid) -> Result<()> {
        for dir in [
            paths::PORTFOLIOS.to_string(),
            paths::portfolio_dir(entity),
        ] {
            if !self.fs.isdir(&dir).await {
                self.fs.mkdir(&dir).await?;
            }
        }
        Ok(())
    }

    async fn write_doc(&self, entity: &Uuid, doc: &AnyDocument) -> Result<()> {
        let path = paths::doc_path(entity, &doc.stamp().id, doc.kind())
            .ok_or_else(|| DocError::Malformed("document kind has no file form".into()))?;
        let bytes = doc.serialize();
        if self.fs.isfile(&path).await {
            self.fs.save(&path, &bytes, None).await?;
        } else {
            self.fs
                .mkfile(
                    &path,
                    &bytes,
                    FileOptions {
                        id: Some(doc.stamp().id),
                        owner: Some(*entity),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Persist a public portfolio (its own or a peer's).
    pub async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        let entity = portfolio.id();
        self.ensure_dirs(&entity).await?;
        let mut docs: Vec<AnyDocument> = vec![match &portfolio.entity {
            Entity::Person(p) => AnyDocument::Person(p.clone()),
            Entity::Ministry(m) => AnyDocument::Ministry(m.clone()),
            Entity::Church(c) => AnyDocument::Church(c.clone()),
        }];
        docs.extend(portfolio.keys.iter().cloned().map(AnyDocument::Keys));
        if let Some(profile) = &portfolio.profile {
            docs.push(AnyDocument::Profile(profile.clone()));
        }
        docs.extend(portfolio.trusted.iter().cloned().map(AnyDocument::Trusted));
        docs.extend(portfolio.verified.iter().cloned().map(AnyDocument::Verified));
        docs.extend(portfolio.revoked.iter().cloned().map(AnyDocument::Revoked));
        for doc in &docs {
            self.write_doc(&entity, doc).await?;
        }
        tracing::debug!(target: "portfolio", %entity, docs = docs.len(), "portfolio saved");
        Ok(())
    }

    /// Persist the private half on top of the public one.
    pub async fn save_private(&self, private: &PrivatePortfolio) -> Result<()> {
        self.save(&private.portfolio).await?;
        let entity = private.id();
        self.write_doc(&entity, &AnyDocument::PrivateKeys(private.privkeys.clone()))
            .await?;
        self.write_doc(&entity, &AnyDocument::Domain(private.domain.clone()))
            .await?;
        for node in &private.nodes {
            self.write_doc(&entity, &AnyDocument::Node(node.clone()))
                .await?;
        }
        if let Some(network) = &private.network {
            self.write_doc(&entity, &AnyDocument::Network(network.clone()))
                .await?;
        }
        Ok(())
    }

    async fn load_docs(&self, entity: &Uuid) -> Result<Vec<Arc<AnyDocument>>> {
        let pattern = format!("{}/*", paths::portfolio_dir(entity));
        let hits: Vec<_> = self
            .fs
            .search(Query::new().pattern(&pattern))
            .await
            .collect()
            .await;
        let mut docs = Vec::with_capacity(hits.len());
        for (entry, path) in hits {
            if let Some(cached) = self.cache.get(&entry.id) {
                docs.push(cached);
                continue;
            }
            let bytes = self.fs.load(&path).await?;
            docs.push(self.cache.put(AnyDocument::deserialize(&bytes)?));
        }
        Ok(docs)
    }

    /// Load a public portfolio by entity id.
    pub async fn load(&self, entity: &Uuid) -> Result<Portfolio> {
        let docs = self.load_docs(entity).await?;
        assemble_portfolio(docs.iter().map(|d| d.as_ref()))
    }

    /// Load the full private portfolio by entity id.
    pub async fn load_private(&self, entity: &Uuid) -> Result<PrivatePortfolio> {
        let portfolio = self.load(entity).await?;
        let docs = self.load_docs(entity).await?;
        let mut privkeys: Option<PrivateKeys> = None;
        let mut domain: Option<Domain> = None;
        let mut nodes: Vec<Node> = Vec::new();
        let mut network: Option<Network> = None;
        for doc in &docs {
            match doc.as_ref() {
                AnyDocument::PrivateKeys(p) => privkeys = Some(p.clone()),
                AnyDocument::Domain(d) => domain = Some(d.clone()),
                AnyDocument::Node(n) => nodes.push(n.clone()),
                AnyDocument::Network(n) => network = Some(n.clone()),
                _ => {}
            }
        }
        Ok(PrivatePortfolio {
            portfolio,
            privkeys: privkeys
                .ok_or_else(|| DocError::Malformed(format!("no private keys for {entity}")))?,
            domain: domain
                .ok_or_else(|| DocError::Malformed(format!("no domain for {entity}")))?,
            nodes,
            network,
        })
    }

    /// Accept a statement into a stored portfolio and persist it.
    pub async fn accept_statement(
        &self,
        portfolio: &mut Portfolio,
        statement: AnyDocument,
    ) -> Result<()> {
        let entity = portfolio.id();
        match statement {
            AnyDocument::Trusted(t) => {
                portfolio.accept_trusted(t.clone())?;
                self.write_doc(&entity, &AnyDocument::Trusted(t)).await?;
            }
            AnyDocument::Verified(v) => {
                portfolio.accept_verified(v.clone())?;
                self.write_doc(&entity, &AnyDocument::Verified(v)).await?;
            }
            AnyDocument::Revoked(r) => {
                self.accept_revoked(portfolio, r).await?;
            }
            other => {
                return Err(DocError::InvalidType(other.kind().tag()));
            }
        }
        Ok(())
    }

    /// Accept a revocation: the referenced statement file is deleted and
    /// the revocation persisted.
    pub async fn accept_revoked(
        &self,
        portfolio: &mut Portfolio,
        revoked: Revoked,
    ) -> Result<()> {
        let entity = portfolio.id();
        let reference = revoked.statement;
        let dropped_kind = portfolio.accept_revoked(revoked.clone())?;
        let kind = match dropped_kind {
            DocKind::Trusted => Some(DocKind::Trusted),
            DocKind::Verified => Some(DocKind::Verified),
            _ => None,
        };
        if let Some(kind) = kind {
            if let Some(path) = paths::doc_path(&entity, &reference, kind) {
                if self.fs.isfile(&path).await {
                    self.fs.remove(&path, RemoveMode::Hard).await?;
                }
            }
            self.write_doc(&entity, &AnyDocument::Revoked(revoked)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_archive::ArchiveHeader;
    use arx_crypto::SecretBytes;
    use chrono::NaiveDate;

    async fn vault(dir: &tempfile::TempDir) -> ArchiveFs {
        let master = SecretBytes::new(arx_crypto::random_array());
        let header = ArchiveHeader::new(
            arx_archive::header::kind::VAULT,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        ArchiveFs::create(dir.path().join("v.arx"), &master, header, 512)
            .await
            .unwrap()
    }

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

    #[tokio::test]
    async fn private_portfolio_survives_storage() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        let cache = DocCache::new();
        let store = PortfolioStore::new(&fs, &cache);

        let private = ada();
        store.save_private(&private).await.unwrap();
        let loaded = store.load_private(&private.id()).await.unwrap();
        assert_eq!(loaded, private);
        loaded.portfolio.validate_entity_and_keys().unwrap();
    }

    #[tokio::test]
    async fn revocation_deletes_the_statement_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        let cache = DocCache::new();
        let store = PortfolioStore::new(&fs, &cache);

        let issuer = ada();
        let mut portfolio = issuer.portfolio.clone();
        store.save(&portfolio).await.unwrap();

        let mut statement = Trusted::create(issuer.id(), Uuid::new_v4());
        issuer.issue(&mut statement).unwrap();
        store
            .accept_statement(&mut portfolio, AnyDocument::Trusted(statement.clone()))
            .await
            .unwrap();
        let statement_path = paths::doc_path(&issuer.id(), &statement.stamp.id, DocKind::Trusted)
            .unwrap();
        assert!(fs.isfile(&statement_path).await);

        let mut revoked = Revoked::create(issuer.id(), statement.stamp.id);
        issuer.issue(&mut revoked).unwrap();
        store
            .accept_statement(&mut portfolio, AnyDocument::Revoked(revoked.clone()))
            .await
            .unwrap();
        assert!(!fs.isfile(&statement_path).await);
        let revoked_path =
            paths::doc_path(&issuer.id(), &revoked.stamp.id, DocKind::Revoked).unwrap();
        assert!(fs.isfile(&revoked_path).await);

        // reload reflects the revocation
        let reloaded = store.load(&issuer.id()).await.unwrap();
        assert!(reloaded.trusted.is_empty());
        assert!(reloaded.is_revoked(&statement.stamp.id));
    }

    #[test]
    fn cache_drops_unreferenced_documents() {
        let cache = DocCache::new();
        let private = ada();
        let doc = AnyDocument::Domain(private.domain.clone());
        let id = doc.stamp().id;
        let arc = cache.put(doc);
        assert!(cache.get(&id).is_some());
        drop(arc);
        assert!(cache.get(&id).is_none());
    }
}
