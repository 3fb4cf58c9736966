use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use arx_archive::{ArchiveFs, ArchiveHeader};
use arx_crypto::{FileSecretStore, SecretBytes, SecretStore};
use arx_docs::types::entity::{Entity, Person};
use arx_docs::{AnyDocument, DocCache, Document, PortfolioStore, PrivatePortfolio};
use arx_mail::Mailbox;
use arx_replica::{
    ClientSession, HostIdentity, Preset, ReplicaError, SecureChannel, ServerSession,
};

mod bundle;

#[derive(Parser, Debug)]
#[command(author, version, about = "arx: encrypted archive, identity portfolios and replication")]
struct Cli {
    /// Directory holding encrypted master keys (default: config dir)
    #[arg(long, global = true)]
    keystore: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a vault archive with a fresh person identity
    Init {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        given: String,
        #[arg(long)]
        family: String,
        /// All names; defaults to the given name
        #[arg(long = "name")]
        names: Vec<String>,
        #[arg(long, default_value = "undefined")]
        sex: String,
        /// Birth date, YYYY-MM-DD
        #[arg(long)]
        born: NaiveDate,
    },
    /// Show archive identity and content counts without modifying anything
    Inspect {
        archive: PathBuf,
    },
    /// Write the owner's public portfolio to a bundle file
    Export {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Import a peer's portfolio bundle into the vault
    Import {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        input: PathBuf,
    },
    /// Compose, seal and file a mail for an imported contact
    Compose {
        #[arg(long)]
        archive: PathBuf,
        /// Recipient entity UUID (must be imported)
        #[arg(long)]
        to: Uuid,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },
    /// Open every envelope waiting in the inbox
    OpenMail {
        #[arg(long)]
        archive: PathBuf,
    },
    /// Serve replication sessions for this archive
    Serve {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = "127.0.0.1:7370")]
        listen: String,
    },
    /// Replicate against a serving peer
    Sync {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        connect: String,
        #[arg(long, default_value = "mail")]
        preset: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// §exit codes: 1 protocol, 2 crypto, 3 misconfiguration, 4 threshold.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(replica) = err.downcast_ref::<ReplicaError>() {
        return match replica {
            ReplicaError::ThresholdReached => 4,
            ReplicaError::Crypto(_) => 2,
            ReplicaError::Protocol(_)
            | ReplicaError::ChunkMismatch { .. }
            | ReplicaError::SizeMismatch { .. }
            | ReplicaError::VersionMismatch { .. }
            | ReplicaError::PeerClosed => 1,
            _ => 3,
        };
    }
    if err.downcast_ref::<arx_crypto::CryptoError>().is_some() {
        return 2;
    }
    3
}

async fn run(cli: Cli) -> Result<()> {
    let keys = keystore(cli.keystore.as_deref())?;
    match cli.cmd {
        Cmd::Init {
            archive,
            given,
            family,
            names,
            sex,
            born,
        } => init(&keys, &archive, &given, &family, &names, &sex, born).await,
        Cmd::Inspect { archive } => inspect(&keys, &archive).await,
        Cmd::Export { archive, output } => export(&keys, &archive, &output).await,
        Cmd::Import { archive, input } => import(&keys, &archive, &input).await,
        Cmd::Compose {
            archive,
            to,
            subject,
            body,
        } => compose(&keys, &archive, to, &subject, &body).await,
        Cmd::OpenMail { archive } => open_mail(&keys, &archive).await,
        Cmd::Serve { archive, listen } => serve(&keys, &archive, &listen).await,
        Cmd::Sync {
            archive,
            connect,
            preset,
        } => sync(&keys, &archive, &connect, &preset).await,
    }
}

fn keystore(dir: Option<&Path>) -> Result<FileSecretStore> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => FileSecretStore::host_dir().context("no config directory on this host")?,
    };
    let passphrase =
        std::env::var("ARX_PASSPHRASE").context("ARX_PASSPHRASE not set for the key store")?;
    Ok(FileSecretStore::open(dir, passphrase.as_bytes())?)
}

fn master_name(archive: &Path) -> String {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    format!("master-{stem}")
}

async fn open_vault(keys: &FileSecretStore, archive: &Path) -> Result<ArchiveFs> {
    let master = keys
        .get(&master_name(archive))
        .with_context(|| format!("no master key for {}", archive.display()))?;
    let master =
        SecretBytes::from_slice(&master).context("stored master key has the wrong size")?;
    Ok(ArchiveFs::open(archive, &master).await?)
}

async fn owner_portfolio(fs: &ArchiveFs) -> Result<(PrivatePortfolio, DocCache)> {
    let cache = DocCache::new();
    let owner = fs.header().await.owner;
    let private = PortfolioStore::new(fs, &cache).load_private(&owner).await?;
    Ok((private, cache))
}

async fn init(
    keys: &FileSecretStore,
    archive: &Path,
    given: &str,
    family: &str,
    names: &[String],
    sex: &str,
    born: NaiveDate,
) -> Result<()> {
    if archive.exists() {
        bail!("{} already exists", archive.display());
    }
    let mut all_names: Vec<&str> = names.iter().map(String::as_str).collect();
    if all_names.is_empty() {
        all_names.push(given);
    }

    let person = Person::create(given, family, &all_names, sex, born);
    let private = PrivatePortfolio::setup(Entity::Person(person))?;
    let entity_id = private.id();

    let master = SecretBytes::<32>::new(arx_crypto::random_array());
    keys.set(&master_name(archive), master.expose())?;

    let header = ArchiveHeader::new(
        arx_archive::header::kind::VAULT,
        entity_id,
        Uuid::new_v4(),
        private.domain.stamp.id,
    );
    let fs = ArchiveFs::create(archive, &master, header, arx_archive::header::DEFAULT_BLOCK_SIZE)
        .await?;

    let cache = DocCache::new();
    PortfolioStore::new(&fs, &cache).save_private(&private).await?;
    Mailbox::new(&fs).init().await?;

    println!("vault {} ready", archive.display());
    println!("entity {entity_id}");
    Ok(())
}

async fn inspect(keys: &FileSecretStore, archive: &Path) -> Result<()> {
    let fs = open_vault(keys, archive).await?;
    let header = fs.header().await;
    println!("archive   {}", archive.display());
    println!("kind      {}", header.archive_kind);
    println!("owner     {}", header.owner);
    println!("node      {}", header.node);
    println!("domain    {}", header.domain);
    println!(
        "portfolios {}",
        fs.glob("/portfolios/*", None).await.len()
    );
    println!(
        "inbox      {}",
        fs.glob("/messages/inbox/*", None).await.len()
    );
    Ok(())
}

async fn export(keys: &FileSecretStore, archive: &Path, output: &Path) -> Result<()> {
    let fs = open_vault(keys, archive).await?;
    let (private, _cache) = owner_portfolio(&fs).await?;

    let mut docs: Vec<AnyDocument> = vec![private.portfolio.entity.clone().into()];
    docs.extend(
        private
            .portfolio
            .keys
            .iter()
            .cloned()
            .map(AnyDocument::Keys),
    );
    if let Some(profile) = &private.portfolio.profile {
        docs.push(AnyDocument::Profile(profile.clone()));
    }
    std::fs::write(output, bundle::encode(&docs))?;
    println!("exported {} documents to {}", docs.len(), output.display());
    Ok(())
}

async fn import(keys: &FileSecretStore, archive: &Path, input: &Path) -> Result<()> {
    let fs = open_vault(keys, archive).await?;
    let docs = bundle::decode(&std::fs::read(input)?)?;
    let portfolio = arx_docs::assemble_portfolio(docs.iter())?;
    portfolio.validate_entity_and_keys()?;

    let cache = DocCache::new();
    PortfolioStore::new(&fs, &cache).save(&portfolio).await?;
    println!("imported portfolio {}", portfolio.id());
    Ok(())
}

async fn compose(
    keys: &FileSecretStore,
    archive: &Path,
    to: Uuid,
    subject: &str,
    body: &str,
) -> Result<()> {
    let fs = open_vault(keys, archive).await?;
    let (private, cache) = owner_portfolio(&fs).await?;
    let recipient = PortfolioStore::new(&fs, &cache)
        .load(&to)
        .await
        .with_context(|| format!("contact {to} is not imported"))?;

    let mail = arx_mail::compose_signed(&private, &recipient, subject, body)?;
    let envelope = arx_mail::wrap(&private, &recipient, &mail)?;

    let mailbox = Mailbox::new(&fs);
    mailbox.init().await?;
    mailbox.draft(&mail).await?;
    let path = mailbox.post(&envelope).await?;
    println!("envelope {} filed at {}", envelope.stamp.id, path);
    Ok(())
}

async fn open_mail(keys: &FileSecretStore, archive: &Path) -> Result<()> {
    let fs = open_vault(keys, archive).await?;
    let (private, cache) = owner_portfolio(&fs).await?;
    let store = PortfolioStore::new(&fs, &cache);
    let mailbox = Mailbox::new(&fs);

    let waiting = mailbox.inbox().await;
    if waiting.is_empty() {
        println!("inbox is empty");
        return Ok(());
    }
    for envelope_id in waiting {
        let path = arx_docs::paths::message_path("inbox", &envelope_id, arx_docs::DocKind::Envelope)
            .expect("envelope extension");
        let envelope =
            arx_docs::types::Envelope::deserialize(&fs.load(&path).await?)?;
        let sender = store
            .load(&envelope.stamp.issuer)
            .await
            .with_context(|| format!("sender {} is not imported", envelope.stamp.issuer))?;
        match mailbox.open_letter(&private, &sender, &envelope_id).await {
            Ok(mail) => {
                println!("from    {}", mail.stamp.issuer);
                println!("subject {}", mail.subject);
                println!("{}", mail.body);
                println!();
            }
            Err(err) => {
                eprintln!("envelope {envelope_id}: {err}");
            }
        }
    }
    Ok(())
}

fn host_identity(fs_header: &ArchiveHeader, private: &PrivatePortfolio) -> Result<HostIdentity> {
    Ok(HostIdentity {
        sign: private.sign_pair()?,
        node: fs_header.node,
    })
}

async fn serve(keys: &FileSecretStore, archive: &Path, listen: &str) -> Result<()> {
    let fs = open_vault(keys, archive).await?;
    let (private, _cache) = owner_portfolio(&fs).await?;
    let identity = host_identity(&fs.header().await, &private)?;

    let listener = TcpListener::bind(listen).await?;
    println!("serving {} on {listen}", archive.display());
    loop {
        let (socket, peer_addr) = listener.accept().await?;
        tracing::info!(target: "replica", %peer_addr, "session accepted");
        let channel = match SecureChannel::accept(socket, &identity).await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(target: "replica", %peer_addr, error = %err, "handshake failed");
                continue;
            }
        };
        if let Err(err) = ServerSession::new(channel, &fs).run().await {
            tracing::warn!(target: "replica", %peer_addr, error = %err, "session failed");
            if matches!(err, ReplicaError::ThresholdReached) {
                return Err(err.into());
            }
        }
    }
}

async fn sync(keys: &FileSecretStore, archive: &Path, connect: &str, preset: &str) -> Result<()> {
    let preset = Preset::by_name(preset)
        .with_context(|| format!("unknown preset {preset:?}"))?;
    let fs = open_vault(keys, archive).await?;
    let (private, _cache) = owner_portfolio(&fs).await?;
    let identity = host_identity(&fs.header().await, &private)?;

    let socket = TcpStream::connect(connect).await?;
    let channel = SecureChannel::connect(socket, &identity, None).await?;
    let stats = ClientSession::new(channel, &fs, preset).run().await?;
    println!(
        "pulled {} pushed {} deleted {} skipped {}",
        stats.pulled, stats.pushed, stats.deleted, stats.skipped
    );
    Ok(())
}
