//! Hierarchical filesystem over the stream store.
//!
//! Two in-memory indices carry all navigation: id → entry (with its slot in
//! the entry table) and (parent id, name) → id for sibling lookup. Directory
//! paths are cached absolute strings. Paths are absolute POSIX, `.`/`..`
//! unsupported.
//!
//! Every mutating operation stages its block writes and finishes with one
//! `sync()`; failing before that point leaves the on-disk image unchanged.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use futures::Stream;
use tokio::sync::Mutex;
use uuid::Uuid;

use arx_crypto::hash::digest64;
use arx_crypto::SecretBytes;

use crate::entry::{Entry, EntryKind, ENTRY_SIZE, NAME_MAX};
use crate::glob::glob_match;
use crate::header::ArchiveHeader;
use crate::query::Query;
use crate::streams::{StreamId, StreamManager};
use crate::{ArchiveError, Result};

// Entry records store timestamps at one-second resolution; keep the
// in-memory state at the same resolution so nothing shifts on reopen.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Tombstone or purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
    /// Mark the entry deleted; data stays until compaction.
    Soft,
    /// Release the record slot and free the content stream.
    Hard,
}

/// Optional attributes for [`ArchiveFs::mkfile`].
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    pub id: Option<Uuid>,
    pub owner: Option<Uuid>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub perms: Option<u16>,
}

struct FsInner {
    mgr: StreamManager,
    /// id → slot index in the entry table.
    slots: HashMap<Uuid, usize>,
    /// slot index → record; `None` is a vacant slot.
    records: Vec<Option<Entry>>,
    /// (parent, name) → id, live entries only.
    children: HashMap<(Uuid, String), Uuid>,
    /// Cached absolute paths for live directories.
    dir_paths: HashMap<Uuid, String>,
}

/// Filesystem facade over one archive image. Mutations are serialized by an
/// internal lock; the single-writer discipline of the stream layer holds.
pub struct ArchiveFs {
    inner: Mutex<FsInner>,
}

impl ArchiveFs {
    /// Create a fresh archive at `path`.
    pub async fn create(
        path: impl AsRef<Path>,
        master_key: &SecretBytes<32>,
        header: ArchiveHeader,
        block_size: u16,
    ) -> Result<Self> {
        let mgr = StreamManager::create(path, master_key, header, block_size).await?;
        Ok(ArchiveFs {
            inner: Mutex::new(FsInner {
                mgr,
                slots: HashMap::new(),
                records: Vec::new(),
                children: HashMap::new(),
                dir_paths: HashMap::new(),
            }),
        })
    }

    /// Open an existing archive, rebuilding indices and the free list.
    pub async fn open(path: impl AsRef<Path>, master_key: &SecretBytes<32>) -> Result<Self> {
        let mut mgr = StreamManager::open(path, master_key).await?;

        let mut records: Vec<Option<Entry>> = Vec::new();
        if let Some((entry_stream, len)) = mgr.entry_stream() {
            let raw = mgr.read(entry_stream, 0, len as usize).await?;
            for chunk in raw.chunks_exact(ENTRY_SIZE) {
                records.push(Entry::decode(chunk)?);
            }
        }

        let mut slots = HashMap::new();
        let mut children = HashMap::new();
        let mut heads = Vec::new();
        for (slot, record) in records.iter().enumerate() {
            let Some(entry) = record else { continue };
            slots.insert(entry.id, slot);
            if !entry.deleted {
                children.insert((entry.parent, entry.name.clone()), entry.id);
            }
            if entry.first_block != 0 {
                heads.push(StreamId(entry.first_block as u32));
            }
        }
        mgr.rebuild_free(&heads).await?;

        let mut inner = FsInner {
            mgr,
            slots,
            records,
            children,
            dir_paths: HashMap::new(),
        };
        inner.rebuild_dir_paths();
        Ok(ArchiveFs {
            inner: Mutex::new(inner),
        })
    }

    /// Archive identity header.
    pub async fn header(&self) -> ArchiveHeader {
        self.inner.lock().await.mgr.header().clone()
    }

    /// Create a directory. Parents must already exist.
    pub async fn mkdir(&self, path: &str) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        let (parent, name) = inner.resolve_parent(path)?;
        if inner.children.contains_key(&(parent, name.clone())) {
            return Err(ArchiveError::NameTaken(path.to_string()));
        }
        let now = now();
        let entry = Entry {
            id: Uuid::new_v4(),
            parent,
            kind: EntryKind::Directory,
            name,
            size: 0,
            first_block: 0,
            stream_tag: 0,
            owner: inner.mgr.header().owner,
            perms: 0o755,
            created: now,
            modified: now,
            deleted: false,
            digest: [0u8; 64],
            target: Uuid::nil(),
        };
        let id = entry.id;
        let full = inner.path_of(&entry);
        inner.insert_entry(entry).await?;
        inner.dir_paths.insert(id, full);
        inner.mgr.sync().await?;
        Ok(id)
    }

    /// Create a file with `data` as content.
    pub async fn mkfile(&self, path: &str, data: &[u8], opts: FileOptions) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        let (parent, name) = inner.resolve_parent(path)?;
        if inner.children.contains_key(&(parent, name.clone())) {
            return Err(ArchiveError::NameTaken(path.to_string()));
        }
        let stream = inner.mgr.create_stream().await?;
        inner.mgr.write(stream, 0, data).await?;
        let now = now();
        let entry = Entry {
            id: opts.id.unwrap_or_else(Uuid::new_v4),
            parent,
            kind: EntryKind::File,
            name,
            size: data.len() as u64,
            first_block: stream.head() as u64,
            stream_tag: stream.tag(),
            owner: opts.owner.unwrap_or(inner.mgr.header().owner),
            perms: opts.perms.unwrap_or(0o644),
            created: opts.created.unwrap_or(now),
            modified: opts.modified.unwrap_or(now),
            deleted: false,
            digest: digest64(data),
            target: Uuid::nil(),
        };
        let id = entry.id;
        inner.insert_entry(entry).await?;
        inner.mgr.sync().await?;
        Ok(id)
    }

    /// Create a link at `path` pointing at the entry behind `target_path`.
    pub async fn link(&self, path: &str, target_path: &str) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        let target_id = inner.resolve(target_path)?;
        let target = inner.entry(&target_id)?.clone();
        if target.is_link() {
            return Err(ArchiveError::Link2Link(target_path.to_string()));
        }
        let (parent, name) = inner.resolve_parent(path)?;
        if inner.children.contains_key(&(parent, name.clone())) {
            return Err(ArchiveError::NameTaken(path.to_string()));
        }
        let now = now();
        let entry = Entry {
            id: Uuid::new_v4(),
            parent,
            kind: EntryKind::Link,
            name,
            size: 0,
            first_block: 0,
            stream_tag: 0,
            owner: inner.mgr.header().owner,
            perms: 0o644,
            created: now,
            modified: now,
            deleted: false,
            digest: [0u8; 64],
            target: target_id,
        };
        let id = entry.id;
        inner.insert_entry(entry).await?;
        inner.mgr.sync().await?;
        Ok(id)
    }

    /// Overwrite a file's content. Follows a link to its target.
    pub async fn save(
        &self,
        path: &str,
        data: &[u8],
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.resolve_file(path)?;
        let entry = inner.entry(&id)?.clone();
        let stream = StreamId(entry.first_block as u32);
        inner.mgr.write(stream, 0, data).await?;
        inner.mgr.truncate(stream, data.len() as u64).await?;

        let slot = inner.slots[&id];
        let record = inner.records[slot].as_mut().expect("live slot");
        record.size = data.len() as u64;
        record.digest = digest64(data);
        record.modified = modified.unwrap_or_else(now);
        inner.write_slot(slot).await?;
        inner.mgr.sync().await?;
        Ok(())
    }

    /// Read a file's full content, verifying its digest. Follows links.
    pub async fn load(&self, path: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        let id = inner.resolve_file(path)?;
        let entry = inner.entry(&id)?.clone();
        let stream = StreamId(entry.first_block as u32);
        let data = inner.mgr.read(stream, 0, entry.size as usize).await?;
        if digest64(&data) != entry.digest {
            return Err(ArchiveError::DigestInvalid(path.to_string()));
        }
        Ok(data)
    }

    /// Remove an entry. Directories must be empty.
    pub async fn remove(&self, path: &str, mode: RemoveMode) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.resolve(path)?;
        let entry = inner.entry(&id)?.clone();

        if entry.is_dir() {
            let has_live_child = inner.children.keys().any(|(p, _)| *p == id);
            let has_any_child = inner
                .records
                .iter()
                .flatten()
                .any(|e| e.parent == id);
            match mode {
                RemoveMode::Soft if has_live_child => {
                    return Err(ArchiveError::NotEmpty(path.to_string()))
                }
                RemoveMode::Hard if has_any_child => {
                    return Err(ArchiveError::NotEmpty(path.to_string()))
                }
                _ => {}
            }
        }

        match mode {
            RemoveMode::Soft => {
                let slot = inner.slots[&id];
                {
                    // deletion counts as a modification; replication orders
                    // tombstones against live copies by this timestamp
                    let record = inner.records[slot].as_mut().expect("live slot");
                    record.deleted = true;
                    record.modified = now();
                }
                inner.children.remove(&(entry.parent, entry.name.clone()));
                inner.dir_paths.remove(&id);
                inner.write_slot(slot).await?;
            }
            RemoveMode::Hard => {
                if entry.first_block != 0 {
                    inner
                        .mgr
                        .free_stream(StreamId(entry.first_block as u32))
                        .await?;
                }
                let slot = inner.slots.remove(&id).expect("indexed");
                inner.records[slot] = None;
                inner.children.remove(&(entry.parent, entry.name.clone()));
                inner.dir_paths.remove(&id);
                inner.clear_slot(slot).await?;
            }
        }
        inner.mgr.sync().await?;
        Ok(())
    }

    /// Move an entry under a different directory, keeping its name.
    pub async fn move_entry(&self, path: &str, new_parent_path: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.resolve(path)?;
        let new_parent = if new_parent_path == "/" {
            Uuid::nil()
        } else {
            let pid = inner.resolve(new_parent_path)?;
            if !inner.entry(&pid)?.is_dir() {
                return Err(ArchiveError::WrongEntry(new_parent_path.to_string()));
            }
            pid
        };
        let entry = inner.entry(&id)?.clone();
        if inner
            .children
            .contains_key(&(new_parent, entry.name.clone()))
        {
            return Err(ArchiveError::NameTaken(entry.name.clone()));
        }
        // a directory must not move under its own subtree
        if entry.is_dir() {
            let mut cursor = new_parent;
            while cursor != Uuid::nil() {
                if cursor == id {
                    return Err(ArchiveError::PathInvalid(new_parent_path.to_string()));
                }
                cursor = inner.entry(&cursor)?.parent;
            }
        }

        inner.children.remove(&(entry.parent, entry.name.clone()));
        let slot = inner.slots[&id];
        {
            let record = inner.records[slot].as_mut().expect("live slot");
            record.parent = new_parent;
            record.modified = now();
        }
        inner.children.insert((new_parent, entry.name.clone()), id);
        if entry.is_dir() {
            inner.rebuild_dir_paths();
        }
        inner.write_slot(slot).await?;
        inner.mgr.sync().await?;
        Ok(())
    }

    pub async fn isfile(&self, path: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .resolve(path)
            .ok()
            .and_then(|id| inner.entry(&id).ok().map(Entry::is_file))
            .unwrap_or(false)
    }

    pub async fn isdir(&self, path: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .resolve(path)
            .ok()
            .and_then(|id| inner.entry(&id).ok().map(Entry::is_dir))
            .unwrap_or(false)
    }

    pub async fn islink(&self, path: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .resolve(path)
            .ok()
            .and_then(|id| inner.entry(&id).ok().map(Entry::is_link))
            .unwrap_or(false)
    }

    /// Paths of live entries matching a glob pattern, optionally restricted
    /// to one owner. Sorted.
    pub async fn glob(&self, pattern: &str, owner: Option<Uuid>) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut out: Vec<String> = inner
            .records
            .iter()
            .flatten()
            .filter(|e| !e.deleted)
            .filter(|e| owner.map_or(true, |o| e.owner == o))
            .map(|e| inner.path_of(e))
            .filter(|p| glob_match(pattern, p))
            .collect();
        out.sort();
        out
    }

    /// Run a query and stream the matching `(entry, path)` pairs.
    pub async fn search(&self, query: Query) -> impl Stream<Item = (Entry, String)> + Send {
        let inner = self.inner.lock().await;
        let mut matches = Vec::new();
        for entry in inner.records.iter().flatten() {
            let path = inner.path_of(entry);
            if !query.matches(entry, &path) {
                continue;
            }
            if query.follow && entry.is_link() {
                match inner.entry(&entry.target) {
                    Ok(target) if !target.is_link() => matches.push((target.clone(), path)),
                    _ => {
                        tracing::warn!(target: "archive", %path, "skipping broken link");
                    }
                }
            } else {
                matches.push((entry.clone(), path));
            }
        }
        futures::stream::iter(matches)
    }

    /// Entry metadata for a path, without following links.
    pub async fn stat(&self, path: &str) -> Result<Entry> {
        let inner = self.inner.lock().await;
        let id = inner.resolve(path)?;
        inner.entry(&id).cloned()
    }

    /// Look an entry up by id, tombstones included, with its path.
    pub async fn find(&self, id: &Uuid) -> Option<(Entry, String)> {
        let inner = self.inner.lock().await;
        let slot = *inner.slots.get(id)?;
        let entry = inner.records[slot].as_ref()?.clone();
        let path = inner.path_of(&entry);
        Some((entry, path))
    }

    /// Create a directory and any missing parents.
    pub async fn mkdir_all(&self, path: &str) -> Result<()> {
        if path == "/" {
            return Ok(());
        }
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let mut current = String::new();
        for seg in segments {
            current.push('/');
            current.push_str(seg);
            if !self.isdir(&current).await {
                self.mkdir(&current).await?;
            }
        }
        Ok(())
    }
}

impl FsInner {
    fn entry(&self, id: &Uuid) -> Result<&Entry> {
        self.slots
            .get(id)
            .and_then(|slot| self.records[*slot].as_ref())
            .ok_or_else(|| ArchiveError::NotFound(id.to_string()))
    }

    /// Split and validate an absolute path into segments.
    fn segments(path: &str) -> Result<Vec<&str>> {
        if !path.starts_with('/') || path.len() > 4096 {
            return Err(ArchiveError::PathInvalid(path.to_string()));
        }
        if path == "/" {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for seg in path[1..].split('/') {
            if seg.is_empty() || seg == "." || seg == ".." || seg.len() > NAME_MAX {
                return Err(ArchiveError::PathInvalid(path.to_string()));
            }
            out.push(seg);
        }
        Ok(out)
    }

    /// Resolve a full path to an entry id. Deleted entries do not resolve.
    fn resolve(&self, path: &str) -> Result<Uuid> {
        let segments = Self::segments(path)?;
        if segments.is_empty() {
            return Err(ArchiveError::PathInvalid(path.to_string()));
        }
        let mut cursor = Uuid::nil();
        for (i, seg) in segments.iter().enumerate() {
            let id = self
                .children
                .get(&(cursor, seg.to_string()))
                .copied()
                .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
            if i + 1 < segments.len() && !self.entry(&id)?.is_dir() {
                return Err(ArchiveError::WrongEntry(path.to_string()));
            }
            cursor = id;
        }
        Ok(cursor)
    }

    /// Resolve the parent directory for a to-be-created entry; a missing
    /// parent is a path error, not a lookup miss.
    fn resolve_parent(&self, path: &str) -> Result<(Uuid, String)> {
        let segments = Self::segments(path)?;
        let Some((name, dirs)) = segments.split_last() else {
            return Err(ArchiveError::PathInvalid(path.to_string()));
        };
        let mut cursor = Uuid::nil();
        for seg in dirs {
            let id = self
                .children
                .get(&(cursor, seg.to_string()))
                .copied()
                .ok_or_else(|| ArchiveError::PathInvalid(path.to_string()))?;
            if !self.entry(&id)?.is_dir() {
                return Err(ArchiveError::WrongEntry(path.to_string()));
            }
            cursor = id;
        }
        Ok((cursor, name.to_string()))
    }

    /// Resolve to a file id, following one link hop.
    fn resolve_file(&self, path: &str) -> Result<Uuid> {
        let id = self.resolve(path)?;
        let entry = self.entry(&id)?;
        match entry.kind {
            EntryKind::File => Ok(id),
            EntryKind::Link => {
                let target = self
                    .entry(&entry.target)
                    .map_err(|_| ArchiveError::LinkBroken(path.to_string()))?;
                if target.deleted {
                    return Err(ArchiveError::LinkBroken(path.to_string()));
                }
                if !target.is_file() {
                    return Err(ArchiveError::WrongEntry(path.to_string()));
                }
                Ok(target.id)
            }
            EntryKind::Directory => Err(ArchiveError::WrongEntry(path.to_string())),
        }
    }

    fn path_of(&self, entry: &Entry) -> String {
        if entry.parent == Uuid::nil() {
            format!("/{}", entry.name)
        } else {
            match self.dir_paths.get(&entry.parent) {
                Some(dir) => format!("{}/{}", dir, entry.name),
                None => format!("/?lost?/{}", entry.name),
            }
        }
    }

    fn rebuild_dir_paths(&mut self) {
        self.dir_paths.clear();
        // Fixpoint pass; the tree is shallow and this runs on open/move only.
        loop {
            let mut progressed = false;
            for entry in self.records.iter().flatten() {
                if !entry.is_dir() || entry.deleted || self.dir_paths.contains_key(&entry.id) {
                    continue;
                }
                let path = if entry.parent == Uuid::nil() {
                    Some(format!("/{}", entry.name))
                } else {
                    self.dir_paths
                        .get(&entry.parent)
                        .map(|p| format!("{}/{}", p, entry.name))
                };
                if let Some(path) = path {
                    self.dir_paths.insert(entry.id, path);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Add a record, reusing a vacant slot when available, and persist it.
    async fn insert_entry(&mut self, entry: Entry) -> Result<()> {
        let slot = match self.records.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                self.records.push(None);
                self.records.len() - 1
            }
        };
        self.slots.insert(entry.id, slot);
        self.children
            .insert((entry.parent, entry.name.clone()), entry.id);
        self.records[slot] = Some(entry);
        self.write_slot(slot).await
    }

    async fn write_slot(&mut self, slot: usize) -> Result<()> {
        let record = self.records[slot].as_ref().expect("live slot").encode();
        self.persist_record(slot, &record).await
    }

    async fn clear_slot(&mut self, slot: usize) -> Result<()> {
        self.persist_record(slot, &[0u8; ENTRY_SIZE]).await
    }

    async fn persist_record(&mut self, slot: usize, record: &[u8; ENTRY_SIZE]) -> Result<()> {
        let stream = match self.mgr.entry_stream() {
            Some((stream, _)) => stream,
            None => {
                let stream = self.mgr.create_stream().await?;
                self.mgr.set_entry_stream(stream, 0);
                stream
            }
        };
        self.mgr
            .write(stream, (slot * ENTRY_SIZE) as u64, record)
            .await?;
        let len = (self.records.len() * ENTRY_SIZE) as u64;
        self.mgr.set_entry_stream(stream, len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::kind;
    use futures::StreamExt;

    async fn vault(dir: &tempfile::TempDir) -> ArchiveFs {
        let master = SecretBytes::new(arx_crypto::random_array());
        let header = ArchiveHeader::new(kind::VAULT, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        ArchiveFs::create(dir.path().join("v.arx"), &master, header, 512)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn mkfile_requires_parent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        assert!(matches!(
            fs.mkfile("/a/b.txt", b"hello", FileOptions::default()).await,
            Err(ArchiveError::PathInvalid(_))
        ));
        fs.mkdir("/a").await.unwrap();
        fs.mkfile("/a/b.txt", b"hello", FileOptions::default())
            .await
            .unwrap();
        assert!(fs.isfile("/a/b.txt").await);
        assert_eq!(fs.load("/a/b.txt").await.unwrap(), b"hello");
        assert!(matches!(
            fs.mkdir("/a").await,
            Err(ArchiveError::NameTaken(_))
        ));
    }

    #[tokio::test]
    async fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/d").await.unwrap();
        fs.mkfile("/d/f", b"first", FileOptions::default())
            .await
            .unwrap();
        fs.save("/d/f", b"now substantially longer content", None)
            .await
            .unwrap();
        assert_eq!(
            fs.load("/d/f").await.unwrap(),
            b"now substantially longer content"
        );
        fs.save("/d/f", b"tiny", None).await.unwrap();
        assert_eq!(fs.load("/d/f").await.unwrap(), b"tiny");
    }

    #[tokio::test]
    async fn sibling_names_unique() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/d").await.unwrap();
        fs.mkfile("/d/x", b"", FileOptions::default()).await.unwrap();
        assert!(matches!(
            fs.mkfile("/d/x", b"", FileOptions::default()).await,
            Err(ArchiveError::NameTaken(_))
        ));
        // same name under a different parent is fine
        fs.mkdir("/e").await.unwrap();
        fs.mkfile("/e/x", b"", FileOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn soft_remove_frees_name_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkfile("/f", b"data", FileOptions::default()).await.unwrap();
        fs.remove("/f", RemoveMode::Soft).await.unwrap();
        assert!(!fs.isfile("/f").await);
        // name reusable, tombstone still searchable
        fs.mkfile("/f", b"new", FileOptions::default()).await.unwrap();
        let tombstones: Vec<_> = fs
            .search(Query::new().deleted(crate::DeletedFilter::Deleted))
            .await
            .collect()
            .await;
        assert_eq!(tombstones.len(), 1);
    }

    #[tokio::test]
    async fn hard_remove_releases_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkfile("/f", &vec![5u8; 2048], FileOptions::default())
            .await
            .unwrap();
        fs.remove("/f", RemoveMode::Hard).await.unwrap();
        assert!(matches!(
            fs.load("/f").await,
            Err(ArchiveError::NotFound(_))
        ));
        let inner = fs.inner.lock().await;
        assert!(inner.mgr.free_blocks() >= 4);
    }

    #[tokio::test]
    async fn nonempty_dir_refuses_removal() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/d").await.unwrap();
        fs.mkfile("/d/f", b"x", FileOptions::default()).await.unwrap();
        assert!(matches!(
            fs.remove("/d", RemoveMode::Soft).await,
            Err(ArchiveError::NotEmpty(_))
        ));
        fs.remove("/d/f", RemoveMode::Hard).await.unwrap();
        fs.remove("/d", RemoveMode::Hard).await.unwrap();
        assert!(!fs.isdir("/d").await);
    }

    #[tokio::test]
    async fn links_follow_and_refuse_chaining() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/docs").await.unwrap();
        fs.mkfile("/docs/orig", b"content", FileOptions::default())
            .await
            .unwrap();
        fs.link("/alias", "/docs/orig").await.unwrap();
        assert!(fs.islink("/alias").await);
        assert_eq!(fs.load("/alias").await.unwrap(), b"content");
        assert!(matches!(
            fs.link("/alias2", "/alias").await,
            Err(ArchiveError::Link2Link(_))
        ));
    }

    #[tokio::test]
    async fn broken_link_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkfile("/orig", b"x", FileOptions::default()).await.unwrap();
        fs.link("/l", "/orig").await.unwrap();
        fs.remove("/orig", RemoveMode::Soft).await.unwrap();
        assert!(matches!(
            fs.load("/l").await,
            Err(ArchiveError::LinkBroken(_))
        ));
    }

    #[tokio::test]
    async fn move_reparents_and_guards_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/a").await.unwrap();
        fs.mkdir("/a/b").await.unwrap();
        fs.mkfile("/a/b/f", b"x", FileOptions::default()).await.unwrap();
        fs.mkdir("/c").await.unwrap();
        fs.move_entry("/a/b", "/c").await.unwrap();
        assert!(fs.isfile("/c/b/f").await);
        assert!(!fs.isdir("/a/b").await);
        assert!(matches!(
            fs.move_entry("/c", "/c/b").await,
            Err(ArchiveError::PathInvalid(_))
        ));
    }

    #[tokio::test]
    async fn glob_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/messages").await.unwrap();
        fs.mkdir("/messages/inbox").await.unwrap();
        let owner = Uuid::new_v4();
        fs.mkfile(
            "/messages/inbox/a.env",
            b"1",
            FileOptions {
                owner: Some(owner),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        fs.mkfile("/messages/inbox/b.env", b"2", FileOptions::default())
            .await
            .unwrap();
        fs.mkfile("/messages/inbox/c.mai", b"3", FileOptions::default())
            .await
            .unwrap();

        let envs = fs.glob("/messages/inbox/*.env", None).await;
        assert_eq!(envs, vec!["/messages/inbox/a.env", "/messages/inbox/b.env"]);
        let owned = fs.glob("/messages/inbox/*", Some(owner)).await;
        assert_eq!(owned, vec!["/messages/inbox/a.env"]);

        let hits: Vec<_> = fs
            .search(Query::new().pattern("/messages/inbox/*.env").owner(owner))
            .await
            .collect()
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "/messages/inbox/a.env");
    }

    #[tokio::test]
    async fn search_follow_reports_target_under_link_path() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        fs.mkdir("/contacts").await.unwrap();
        fs.mkfile("/entity.ent", b"doc", FileOptions::default())
            .await
            .unwrap();
        fs.link("/contacts/friend", "/entity.ent").await.unwrap();
        let hits: Vec<_> = fs
            .search(
                Query::new()
                    .pattern("/contacts/*")
                    .kind(crate::KindFilter::Link)
                    .follow(),
            )
            .await
            .collect()
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "/contacts/friend");
        assert!(hits[0].0.is_file());
    }

    #[tokio::test]
    async fn reopen_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.arx");
        let master = SecretBytes::new(arx_crypto::random_array());
        let header =
            ArchiveHeader::new(kind::VAULT, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        {
            let fs = ArchiveFs::create(&path, &master, header.clone(), 512)
                .await
                .unwrap();
            fs.mkdir("/a").await.unwrap();
            fs.mkfile("/a/f", b"persisted", FileOptions::default())
                .await
                .unwrap();
        }
        let fs = ArchiveFs::open(&path, &master).await.unwrap();
        assert_eq!(fs.load("/a/f").await.unwrap(), b"persisted");
        assert_eq!(fs.header().await, header);
        // and mutation still works after the free-list rebuild
        fs.mkfile("/a/g", b"more", FileOptions::default()).await.unwrap();
        assert_eq!(fs.load("/a/g").await.unwrap(), b"more");
    }

    #[tokio::test]
    async fn dot_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = vault(&dir).await;
        for bad in ["relative", "/a/../b", "/a/./b", "//double", ""] {
            assert!(
                matches!(fs.stat(bad).await, Err(ArchiveError::PathInvalid(_))),
                "path {:?} must be invalid",
                bad
            );
        }
    }
}
