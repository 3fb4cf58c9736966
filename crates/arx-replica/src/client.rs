//! Client side of a replication session.
//!
//! The client drives: it opens with INIT/OPERATION, pulls the server's
//! file list one file per loop until DONE, then pushes its own files the
//! server never mentioned. Wire faults abort the current file, tick the
//! threshold counter and move on; a spent counter ends the session.

use std::collections::HashSet;

use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use arx_archive::ArchiveFs;

use crate::action::{resolve_action, SyncAction};
use crate::channel::SecureChannel;
use crate::packet::{ChunkPayload, FileInfo, Packet, CHUNK_SIZE, PROTOCOL_VERSION};
use crate::preset::Preset;
use crate::session::{
    apply_file, delete_file, list_files, local_info, meta_of, pieces_of, SessionStats,
    ThresholdCounter,
};
use crate::{ReplicaError, Result};

pub struct ClientSession<'a, S> {
    channel: SecureChannel<S>,
    fs: &'a ArchiveFs,
    preset: Preset,
    counter: ThresholdCounter,
    processed: HashSet<Uuid>,
    stats: SessionStats,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin + Send> ClientSession<'a, S> {
    pub fn new(channel: SecureChannel<S>, fs: &'a ArchiveFs, preset: Preset) -> Self {
        ClientSession {
            channel,
            fs,
            preset,
            counter: ThresholdCounter::new(),
            processed: HashSet::new(),
            stats: SessionStats::default(),
        }
    }

    /// Run one full pull+push cycle, ending with CLOSE.
    pub async fn run(mut self) -> Result<SessionStats> {
        self.handshake().await?;
        self.pull().await?;
        self.push().await?;
        self.channel.send(&Packet::Close).await?;
        tracing::info!(
            target: "replica",
            pulled = self.stats.pulled,
            pushed = self.stats.pushed,
            deleted = self.stats.deleted,
            skipped = self.stats.skipped,
            "session closed"
        );
        Ok(self.stats)
    }

    async fn handshake(&mut self) -> Result<()> {
        self.channel
            .send(&Packet::Init {
                version: PROTOCOL_VERSION,
            })
            .await?;
        match self.channel.recv().await? {
            Packet::Version { version } if version == PROTOCOL_VERSION => {}
            Packet::Version { version } => {
                self.channel.send(&Packet::Close).await.ok();
                return Err(ReplicaError::VersionMismatch {
                    ours: PROTOCOL_VERSION,
                    theirs: version,
                });
            }
            other => return Err(unexpected("VERSION", &other)),
        }
        self.channel
            .send(&Packet::Operation {
                version: PROTOCOL_VERSION,
                preset_modified: self.preset.modified,
                preset: self.preset.name.clone(),
                patterns: if self.preset.name == "custom" {
                    self.preset.patterns.clone()
                } else {
                    Vec::new()
                },
            })
            .await?;
        match self.channel.recv().await? {
            Packet::Confirm { ok: true } => Ok(()),
            Packet::Confirm { ok: false } => Err(ReplicaError::Protocol(
                "server refused the operation".into(),
            )),
            other => Err(unexpected("CONFIRM", &other)),
        }
    }

    /// Iterate the server's files until DONE.
    async fn pull(&mut self) -> Result<()> {
        loop {
            self.channel.send(&Packet::Request).await?;
            let server_info = match self.channel.recv().await? {
                Packet::Done => return Ok(()),
                Packet::Response { info } => info,
                other => return Err(unexpected("RESPONSE or DONE", &other)),
            };
            let fileid = server_info.fileid;
            if !self.processed.insert(fileid) {
                continue;
            }
            if let Err(e) = self.reconcile(&server_info).await {
                self.abort(e).await?;
            }
        }
    }

    /// Offer every local file the pull never touched.
    async fn push(&mut self) -> Result<()> {
        let mine = list_files(self.fs, &self.preset).await?;
        for info in mine {
            if self.processed.contains(&info.fileid) {
                continue;
            }
            self.processed.insert(info.fileid);
            if let Err(e) = self.offer(&info).await {
                self.abort(e).await?;
            }
        }
        Ok(())
    }

    /// Pull-side reconciliation of one server-announced file.
    async fn reconcile(&mut self, server_info: &FileInfo) -> Result<()> {
        let client_info = local_info(self.fs, &server_info.fileid, &server_info.path).await;
        let action = resolve_action(
            crate::session::state_of(&client_info).as_ref(),
            crate::session::state_of(server_info).as_ref(),
        );
        if self.sync(&client_info, action).await? {
            self.perform(action, &client_info).await?;
        }
        Ok(())
    }

    /// Push-side offer: the server never announced this id, so its side is
    /// absent and both ends resolve against `None`.
    async fn offer(&mut self, client_info: &FileInfo) -> Result<()> {
        let action = resolve_action(crate::session::state_of(client_info).as_ref(), None);
        if action == SyncAction::Nop {
            self.stats.skipped += 1;
            return Ok(());
        }
        if self.sync(client_info, action).await? {
            self.perform(action, client_info).await?;
        }
        Ok(())
    }

    /// Propose an action; returns whether the server agreed.
    async fn sync(&mut self, client_info: &FileInfo, action: SyncAction) -> Result<bool> {
        self.channel
            .send(&Packet::Sync {
                info: client_info.clone(),
                action,
            })
            .await?;
        match self.channel.recv().await? {
            Packet::Confirm { ok: true } => Ok(true),
            Packet::Confirm { ok: false } => {
                tracing::warn!(
                    target: "replica",
                    fileid = %client_info.fileid,
                    ?action,
                    "action mismatch, skipping file"
                );
                self.stats.skipped += 1;
                self.counter.tick()?;
                Ok(false)
            }
            other => Err(unexpected("CONFIRM", &other)),
        }
    }

    async fn perform(&mut self, action: SyncAction, client_info: &FileInfo) -> Result<()> {
        match action {
            SyncAction::Nop | SyncAction::SerDelete => {
                // SerDelete is applied server-side on confirmation
                if action == SyncAction::SerDelete {
                    self.stats.deleted += 1;
                }
            }
            SyncAction::CliCreate | SyncAction::CliUpdate => {
                self.download(&client_info.fileid).await?;
                self.stats.pulled += 1;
            }
            SyncAction::CliDelete => {
                delete_file(self.fs, &client_info.fileid).await?;
                self.stats.deleted += 1;
            }
            SyncAction::SerCreate | SyncAction::SerUpdate => {
                self.upload(&client_info.fileid).await?;
                self.stats.pushed += 1;
            }
        }
        Ok(())
    }

    async fn download(&mut self, fileid: &Uuid) -> Result<()> {
        self.channel
            .send(&Packet::Download { fileid: *fileid })
            .await?;
        match self.channel.recv().await? {
            Packet::Confirm { ok: true } => {}
            Packet::Confirm { ok: false } => {
                return Err(ReplicaError::Protocol("server cannot send file".into()))
            }
            other => return Err(unexpected("CONFIRM", &other)),
        }

        self.channel
            .send(&Packet::Get {
                what: "meta".into(),
                piece: 0,
            })
            .await?;
        let meta = match self.channel.recv().await? {
            Packet::Chunk(ChunkPayload::Meta(meta)) => meta,
            other => return Err(unexpected("CHUNK meta", &other)),
        };

        let mut data = Vec::with_capacity(meta.size as usize);
        for piece in 0..meta.pieces {
            self.channel
                .send(&Packet::Get {
                    what: "data".into(),
                    piece,
                })
                .await?;
            match self.channel.recv().await? {
                Packet::Chunk(ChunkPayload::Data { piece: got, data: chunk }) => {
                    if got != piece {
                        return Err(ReplicaError::ChunkMismatch {
                            expected: piece,
                            got,
                        });
                    }
                    data.extend_from_slice(&chunk);
                }
                other => return Err(unexpected("CHUNK data", &other)),
            }
        }
        self.channel.send(&Packet::Done).await?;

        if data.len() as u64 != meta.size as u64 {
            return Err(ReplicaError::SizeMismatch {
                announced: meta.size as u64,
                got: data.len() as u64,
            });
        }
        apply_file(self.fs, &meta, &data).await?;
        Ok(())
    }

    async fn upload(&mut self, fileid: &Uuid) -> Result<()> {
        let (entry, path) = self
            .fs
            .find(fileid)
            .await
            .ok_or_else(|| ReplicaError::Protocol("upload of unknown file".into()))?;
        let data = self.fs.load(&path).await?;
        let meta = meta_of(&entry, &path, data.len());

        self.channel
            .send(&Packet::Upload { fileid: *fileid })
            .await?;
        match self.channel.recv().await? {
            Packet::Confirm { ok: true } => {}
            Packet::Confirm { ok: false } => {
                return Err(ReplicaError::Protocol("server refused upload".into()))
            }
            other => return Err(unexpected("CONFIRM", &other)),
        }

        self.channel
            .send(&Packet::Put(ChunkPayload::Meta(meta.clone())))
            .await?;
        self.expect_received("meta", 0).await?;

        for piece in 0..pieces_of(data.len()) {
            let start = piece as usize * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(data.len());
            self.channel
                .send(&Packet::Put(ChunkPayload::Data {
                    piece,
                    data: data[start..end].to_vec(),
                }))
                .await?;
            self.expect_received("data", piece).await?;
        }
        self.channel.send(&Packet::Done).await?;
        Ok(())
    }

    async fn expect_received(&mut self, what: &str, piece: u32) -> Result<()> {
        match self.channel.recv().await? {
            Packet::Received { what: got_what, piece: got } if got_what == what && got == piece => {
                Ok(())
            }
            Packet::Received { piece: got, .. } => Err(ReplicaError::ChunkMismatch {
                expected: piece,
                got,
            }),
            other => Err(unexpected("RECEIVED", &other)),
        }
    }

    /// Wire fault handling: abortable errors cost one abort and the file;
    /// anything else ends the session.
    async fn abort(&mut self, error: ReplicaError) -> Result<()> {
        if !error.is_abortable() {
            return Err(error);
        }
        tracing::warn!(target: "replica", error = %error, "aborting current file");
        self.channel.send(&Packet::Abort).await?;
        self.stats.skipped += 1;
        self.counter.tick()
    }
}

fn unexpected(wanted: &str, got: &Packet) -> ReplicaError {
    ReplicaError::Protocol(format!("expected {wanted}, got {got:?}"))
}
