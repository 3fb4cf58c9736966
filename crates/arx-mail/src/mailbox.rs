//! Mailbox folders and the store-and-forward flow.

use futures::StreamExt;
use uuid::Uuid;

use arx_archive::{ArchiveFs, FileOptions, Query, RemoveMode};
use arx_docs::types::{Envelope, Mail, StoredLetter};
use arx_docs::{paths, DocKind, Document, Portfolio, PrivatePortfolio};

use crate::{open, MailError, Result};

/// Seconds of tolerated skew between the envelope's posting time and the
/// inner mail's.
const POSTED_SKEW_SECS: i64 = 60;

/// Conventional message folders over one archive.
pub struct Mailbox<'a> {
    fs: &'a ArchiveFs,
}

impl<'a> Mailbox<'a> {
    pub fn new(fs: &'a ArchiveFs) -> Self {
        Mailbox { fs }
    }

    /// Create the folder skeleton: message folders, the letter cache and
    /// contact groups. Idempotent.
    pub async fn init(&self) -> Result<()> {
        let mut dirs = vec![paths::MESSAGES.to_string()];
        dirs.extend(
            paths::MESSAGE_FOLDERS
                .iter()
                .map(|f| format!("{}/{f}", paths::MESSAGES)),
        );
        dirs.push("/cache".to_string());
        dirs.push(paths::CACHE_MSG.to_string());
        dirs.push(paths::CONTACTS.to_string());
        dirs.extend(
            paths::CONTACT_FOLDERS
                .iter()
                .map(|f| format!("{}/{f}", paths::CONTACTS)),
        );
        for dir in dirs {
            if !self.fs.isdir(&dir).await {
                self.fs.mkdir(&dir).await?;
            }
        }
        Ok(())
    }

    async fn deposit(&self, folder: &str, id: &Uuid, kind: DocKind, bytes: &[u8]) -> Result<String> {
        let path = paths::message_path(folder, id, kind)
            .ok_or(MailError::Misaddressed("document kind has no mailbox form"))?;
        if self.fs.isfile(&path).await {
            self.fs.save(&path, bytes, None).await?;
        } else {
            self.fs
                .mkfile(
                    &path,
                    bytes,
                    FileOptions {
                        id: Some(*id),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(path)
    }

    /// File an inbound envelope into `/messages/inbox/`.
    pub async fn deliver(&self, envelope: &Envelope) -> Result<String> {
        self.deposit(
            "inbox",
            &envelope.stamp.id,
            DocKind::Envelope,
            &envelope.serialize(),
        )
        .await
    }

    /// File an outbound envelope into `/messages/outbox/`.
    pub async fn post(&self, envelope: &Envelope) -> Result<String> {
        self.deposit(
            "outbox",
            &envelope.stamp.id,
            DocKind::Envelope,
            &envelope.serialize(),
        )
        .await
    }

    /// Keep an unsent mail in `/messages/drafts/`.
    pub async fn draft(&self, mail: &Mail) -> Result<String> {
        self.deposit("drafts", &mail.stamp.id, DocKind::Mail, &mail.serialize())
            .await
    }

    /// Move an envelope from outbox to sent after hand-off.
    pub async fn mark_sent(&self, envelope_id: &Uuid) -> Result<()> {
        let from = paths::message_path("outbox", envelope_id, DocKind::Envelope)
            .expect("envelope has extension");
        self.fs.move_entry(&from, "/messages/sent").await?;
        Ok(())
    }

    /// Envelope ids currently waiting in the inbox.
    pub async fn inbox(&self) -> Vec<Uuid> {
        let pattern = format!("{}/inbox/*.env", paths::MESSAGES);
        self.fs
            .search(Query::new().pattern(pattern))
            .await
            .map(|(entry, _)| entry.id)
            .collect()
            .await
    }

    /// Open one inbox envelope and apply the store-and-forward invariant:
    ///
    /// 1. open must succeed (signatures, seal, validation);
    /// 2. envelope and inner mail must agree on issuer, owner and posting
    ///    time (±60 s), else `StoreMismatch` with **no** side effects;
    /// 3. a `StoredLetter` evidence copy lands in `/cache/msg/`;
    /// 4. the mail lands in `/messages/read/`;
    /// 5. the envelope leaves `/messages/inbox/`.
    pub async fn open_letter(
        &self,
        recipient: &PrivatePortfolio,
        sender: &Portfolio,
        envelope_id: &Uuid,
    ) -> Result<Mail> {
        let inbox_path = paths::message_path("inbox", envelope_id, DocKind::Envelope)
            .expect("envelope has extension");
        let envelope = Envelope::deserialize(&self.fs.load(&inbox_path).await?)?;

        let mail = open(recipient, sender, &envelope)?;

        if envelope.stamp.issuer != mail.stamp.issuer {
            return Err(MailError::StoreMismatch("issuer"));
        }
        if envelope.owner != mail.owner {
            return Err(MailError::StoreMismatch("owner"));
        }
        let delta = (envelope.posted - mail.posted).num_seconds().abs();
        if delta > POSTED_SKEW_SECS {
            return Err(MailError::StoreMismatch("posted drift over 60s"));
        }

        let letter = StoredLetter::create(recipient.id(), envelope.clone(), mail.clone());
        let letter_path = paths::stored_letter_path(&letter.stamp.id);
        self.fs
            .mkfile(
                &letter_path,
                &letter.serialize(),
                FileOptions {
                    id: Some(letter.stamp.id),
                    owner: Some(recipient.id()),
                    ..Default::default()
                },
            )
            .await?;
        self.deposit("read", &mail.stamp.id, DocKind::Mail, &mail.serialize())
            .await?;
        self.fs.remove(&inbox_path, RemoveMode::Hard).await?;

        tracing::info!(
            target: "mail",
            envelope = %envelope_id,
            mail = %mail.stamp.id,
            "letter opened and filed"
        );
        Ok(mail)
    }

    /// Soft-delete a read mail into the trash folder.
    pub async fn discard(&self, mail_id: &Uuid) -> Result<()> {
        let from = paths::message_path("read", mail_id, DocKind::Mail).expect("mail extension");
        self.fs.move_entry(&from, "/messages/trash").await?;
        Ok(())
    }

    /// File a contact: a link in the named group pointing at the entity
    /// document of an imported portfolio.
    pub async fn add_contact(&self, folder: &str, entity: &Uuid) -> Result<String> {
        if !paths::CONTACT_FOLDERS.contains(&folder) {
            return Err(MailError::Misaddressed("unknown contact folder"));
        }
        let target = paths::doc_path(entity, entity, DocKind::Person).expect("entity extension");
        let link = paths::contact_path(folder, entity);
        if !self.fs.islink(&link).await {
            self.fs.link(&link, &target).await?;
        }
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrap::{compose_signed, wrap};
    use arx_archive::ArchiveHeader;
    use arx_crypto::SecretBytes;
    use arx_docs::types::entity::{Entity, Person};
    use chrono::NaiveDate;

    async fn vault(dir: &tempfile::TempDir, owner: Uuid) -> ArchiveFs {
        let master = SecretBytes::new(arx_crypto::random_array());
        let header = ArchiveHeader::new(
            arx_archive::header::kind::VAULT,
            owner,
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        ArchiveFs::create(dir.path().join("v.arx"), &master, header, 512)
            .await
            .unwrap()
    }

    fn portfolio(name: &str) -> PrivatePortfolio {
        let person = Person::create(
            name,
            "Test",
            &[name],
            "undefined",
            NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        );
        PrivatePortfolio::setup(Entity::Person(person)).unwrap()
    }

    #[tokio::test]
    async fn full_store_and_forward_flow() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir, bob.id()).await;
        let mailbox = Mailbox::new(&fs);
        mailbox.init().await.unwrap();

        let mail = compose_signed(&alice, &bob.portfolio, "hello", "world").unwrap();
        let envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();
        mailbox.deliver(&envelope).await.unwrap();
        assert_eq!(mailbox.inbox().await, vec![envelope.stamp.id]);

        let opened = mailbox
            .open_letter(&bob, &alice.portfolio, &envelope.stamp.id)
            .await
            .unwrap();
        assert_eq!(opened, mail);

        // envelope left the inbox, mail is in read, evidence in the cache
        assert!(mailbox.inbox().await.is_empty());
        let read_path =
            paths::message_path("read", &mail.stamp.id, DocKind::Mail).unwrap();
        assert!(fs.isfile(&read_path).await);
        let cached = fs.glob(&format!("{}/*.cml", paths::CACHE_MSG), None).await;
        assert_eq!(cached.len(), 1);

        // and the evidence copy parses back to the same letter
        let letter_bytes = fs.load(&cached[0]).await.unwrap();
        let letter = StoredLetter::deserialize(&letter_bytes).unwrap();
        assert_eq!(letter.message, mail);
        assert_eq!(letter.envelope.stamp.id, envelope.stamp.id);
    }

    #[tokio::test]
    async fn store_mismatch_leaves_no_trace() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir, bob.id()).await;
        let mailbox = Mailbox::new(&fs);
        mailbox.init().await.unwrap();

        // drift the inner mail's posting time past the tolerance, resign
        let mut mail = Mail::compose(alice.id(), bob.id(), "hello", "world");
        mail.posted = mail.posted - chrono::Duration::seconds(3600);
        alice.issue(&mut mail).unwrap();
        let envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();
        mailbox.deliver(&envelope).await.unwrap();

        let err = mailbox
            .open_letter(&bob, &alice.portfolio, &envelope.stamp.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::StoreMismatch(_)));

        // no side effects: envelope still in inbox, nothing read or cached
        assert_eq!(mailbox.inbox().await, vec![envelope.stamp.id]);
        assert!(fs
            .glob(&format!("{}/*.cml", paths::CACHE_MSG), None)
            .await
            .is_empty());
        assert!(fs.glob("/messages/read/*", None).await.is_empty());
    }

    #[tokio::test]
    async fn contact_links_resolve_to_entity_files() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir, alice.id()).await;
        let mailbox = Mailbox::new(&fs);
        mailbox.init().await.unwrap();

        // persist bob's public portfolio, then link him as a friend
        let cache = arx_docs::DocCache::new();
        arx_docs::PortfolioStore::new(&fs, &cache)
            .save(&bob.portfolio)
            .await
            .unwrap();
        let link = mailbox.add_contact("friends", &bob.id()).await.unwrap();
        assert!(fs.islink(&link).await);
        // the link loads the entity document
        let entity = arx_docs::types::Entity::deserialize(&fs.load(&link).await.unwrap()).unwrap();
        assert_eq!(entity.id(), bob.id());
        // idempotent
        mailbox.add_contact("friends", &bob.id()).await.unwrap();
        assert!(matches!(
            mailbox.add_contact("enemies", &bob.id()).await,
            Err(MailError::Misaddressed(_))
        ));
    }

    #[tokio::test]
    async fn drafts_and_trash() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir, alice.id()).await;
        let mailbox = Mailbox::new(&fs);
        mailbox.init().await.unwrap();

        let mail = compose_signed(&alice, &bob.portfolio, "wip", "...").unwrap();
        let draft_path = mailbox.draft(&mail).await.unwrap();
        assert!(fs.isfile(&draft_path).await);

        let envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();
        mailbox.post(&envelope).await.unwrap();
        mailbox.mark_sent(&envelope.stamp.id).await.unwrap();
        let sent =
            paths::message_path("sent", &envelope.stamp.id, DocKind::Envelope).unwrap();
        assert!(fs.isfile(&sent).await);
    }
}
