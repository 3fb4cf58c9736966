//! Pieces shared by both ends of a session.

use futures::StreamExt;
use uuid::Uuid;

use arx_archive::{ArchiveFs, Entry, FileOptions, RemoveMode};

use crate::action::FileState;
use crate::packet::{FileInfo, FileMeta, CHUNK_SIZE};
use crate::preset::Preset;
use crate::{ReplicaError, Result};

/// Abort budget per session.
pub const ABORT_THRESHOLD: u32 = 10;

/// Counts ABORTs; the session dies when the budget is spent.
#[derive(Debug)]
pub struct ThresholdCounter {
    remaining: u32,
}

impl Default for ThresholdCounter {
    fn default() -> Self {
        ThresholdCounter {
            remaining: ABORT_THRESHOLD,
        }
    }
}

impl ThresholdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Spend one abort. Errors with `ThresholdReached` when exhausted.
    pub fn tick(&mut self) -> Result<()> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return Err(ReplicaError::ThresholdReached);
        }
        Ok(())
    }
}

/// Session outcome counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub pulled: u32,
    pub pushed: u32,
    pub deleted: u32,
    pub skipped: u32,
}

pub(crate) fn info_of(entry: &Entry, path: &str) -> FileInfo {
    FileInfo {
        fileid: entry.id,
        path: path.to_string(),
        modified: entry.modified,
        deleted: entry.deleted,
        exists: true,
    }
}

pub(crate) fn state_of(info: &FileInfo) -> Option<FileState> {
    FileState::from_info(info)
}

/// All files a preset covers on one archive, tombstones included.
pub(crate) async fn list_files(fs: &ArchiveFs, preset: &Preset) -> Result<Vec<FileInfo>> {
    let mut out: Vec<FileInfo> = Vec::new();
    for query in preset.queries() {
        let hits: Vec<_> = fs.search(query).await.collect().await;
        for (entry, path) in hits {
            if out.iter().all(|info| info.fileid != entry.id) {
                out.push(info_of(&entry, &path));
            }
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// This side's view of a file by id.
pub(crate) async fn local_info(fs: &ArchiveFs, fileid: &Uuid, fallback_path: &str) -> FileInfo {
    match fs.find(fileid).await {
        Some((entry, path)) => info_of(&entry, &path),
        None => FileInfo::absent(*fileid, fallback_path),
    }
}

pub(crate) fn pieces_of(size: usize) -> u32 {
    size.div_ceil(CHUNK_SIZE) as u32
}

/// Transfer metadata for a live file.
pub(crate) fn meta_of(entry: &Entry, path: &str, size: usize) -> FileMeta {
    FileMeta {
        pieces: pieces_of(size),
        size: size as u32,
        filename: path.to_string(),
        created: entry.created,
        modified: entry.modified,
        owner: entry.owner,
        file_id: entry.id,
        user: entry.owner.to_string(),
        group: String::new(),
        perms: entry.perms as u32,
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

/// Land transferred content: create or overwrite the file described by
/// `meta`, resurrecting a tombstone if one is in the way.
pub(crate) async fn apply_file(fs: &ArchiveFs, meta: &FileMeta, data: &[u8]) -> Result<()> {
    if data.len() as u32 != meta.size {
        return Err(ReplicaError::SizeMismatch {
            announced: meta.size as u64,
            got: data.len() as u64,
        });
    }
    match fs.find(&meta.file_id).await {
        Some((entry, path)) if !entry.deleted => {
            fs.save(&path, data, Some(meta.modified)).await?;
        }
        Some((_, path)) => {
            fs.remove(&path, RemoveMode::Hard).await?;
            create_at(fs, meta, data).await?;
        }
        None => {
            create_at(fs, meta, data).await?;
        }
    }
    Ok(())
}

async fn create_at(fs: &ArchiveFs, meta: &FileMeta, data: &[u8]) -> Result<()> {
    fs.mkdir_all(parent_dir(&meta.filename)).await?;
    fs.mkfile(
        &meta.filename,
        data,
        FileOptions {
            id: Some(meta.file_id),
            owner: Some(meta.owner),
            created: Some(meta.created),
            modified: Some(meta.modified),
            perms: Some(meta.perms as u16),
        },
    )
    .await?;
    Ok(())
}

/// Tombstone a file by id; missing files are fine (nothing to delete).
pub(crate) async fn delete_file(fs: &ArchiveFs, fileid: &Uuid) -> Result<bool> {
    match fs.find(fileid).await {
        Some((entry, path)) if !entry.deleted => {
            fs.remove(&path, RemoveMode::Soft).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
