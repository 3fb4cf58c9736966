//! Server side of a replication session, an explicit state machine:
//! every inbound packet is fed to `handle`, which replies and moves the
//! state. The server never initiates; it answers.

use std::collections::HashSet;

use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use arx_archive::ArchiveFs;

use crate::action::{resolve_action, SyncAction};
use crate::channel::SecureChannel;
use crate::packet::{ChunkPayload, FileInfo, FileMeta, Packet, CHUNK_SIZE, PROTOCOL_VERSION};
use crate::preset::Preset;
use crate::session::{
    apply_file, delete_file, list_files, local_info, meta_of, state_of, ThresholdCounter,
};
use crate::{ReplicaError, Result};

/// Where the session stands.
enum ServerState {
    AwaitInit,
    AwaitOperation,
    /// Between per-file flows; REQUEST, SYNC, DOWNLOAD, UPLOAD, CLOSE are
    /// all legal here.
    Idle,
    /// A download is in flight; the client GETs meta and pieces.
    Sending {
        meta: FileMeta,
        data: Vec<u8>,
    },
    /// An upload is in flight; the client PUTs meta and pieces.
    Receiving {
        fileid: Uuid,
        meta: Option<FileMeta>,
        data: Vec<u8>,
        expected_piece: u32,
    },
}

enum Flow {
    Continue,
    Closed,
}

pub struct ServerSession<'a, S> {
    channel: SecureChannel<S>,
    fs: &'a ArchiveFs,
    state: ServerState,
    counter: ThresholdCounter,
    /// Files still to announce to the pulling client.
    pending: Vec<FileInfo>,
    processed: HashSet<Uuid>,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin + Send> ServerSession<'a, S> {
    pub fn new(channel: SecureChannel<S>, fs: &'a ArchiveFs) -> Self {
        ServerSession {
            channel,
            fs,
            state: ServerState::AwaitInit,
            counter: ThresholdCounter::new(),
            pending: Vec::new(),
            processed: HashSet::new(),
        }
    }

    /// Serve until the client closes or a fatal error ends the session.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let packet = self.channel.recv().await?;
            match self.handle(packet).await? {
                Flow::Continue => {}
                Flow::Closed => return Ok(()),
            }
        }
    }

    async fn handle(&mut self, packet: Packet) -> Result<Flow> {
        // ABORT and CLOSE are legal in any state
        match &packet {
            Packet::Abort => {
                tracing::warn!(target: "replica", "client aborted current file");
                self.state = ServerState::Idle;
                self.counter.tick()?;
                return Ok(Flow::Continue);
            }
            Packet::Close => return Ok(Flow::Closed),
            _ => {}
        }

        match std::mem::replace(&mut self.state, ServerState::Idle) {
            ServerState::AwaitInit => self.on_init(packet).await,
            ServerState::AwaitOperation => self.on_operation(packet).await,
            ServerState::Idle => self.on_idle(packet).await,
            ServerState::Sending { meta, data } => self.on_sending(packet, meta, data).await,
            ServerState::Receiving {
                fileid,
                meta,
                data,
                expected_piece,
            } => {
                self.on_receiving(packet, fileid, meta, data, expected_piece)
                    .await
            }
        }
    }

    async fn on_init(&mut self, packet: Packet) -> Result<Flow> {
        let Packet::Init { version } = packet else {
            return Err(unexpected("INIT", &packet));
        };
        self.channel
            .send(&Packet::Version {
                version: PROTOCOL_VERSION,
            })
            .await?;
        if version != PROTOCOL_VERSION {
            // the client sees the mismatch and closes
            return Err(ReplicaError::VersionMismatch {
                ours: PROTOCOL_VERSION,
                theirs: version,
            });
        }
        self.state = ServerState::AwaitOperation;
        Ok(Flow::Continue)
    }

    async fn on_operation(&mut self, packet: Packet) -> Result<Flow> {
        let Packet::Operation {
            version,
            preset,
            patterns,
            ..
        } = packet
        else {
            return Err(unexpected("OPERATION", &packet));
        };
        let resolved = if preset == "custom" {
            (!patterns.is_empty()).then(|| Preset {
                name: preset.clone(),
                patterns,
                owner: None,
                modified_since: None,
                modified: chrono::DateTime::UNIX_EPOCH,
            })
        } else {
            Preset::by_name(&preset)
        };
        let ok = version == PROTOCOL_VERSION && resolved.is_some();
        self.channel.send(&Packet::Confirm { ok }).await?;
        if !ok {
            return Err(ReplicaError::Protocol(format!(
                "unusable operation: version {version}, preset {preset:?}"
            )));
        }
        self.pending = list_files(self.fs, &resolved.expect("checked")).await?;
        self.pending.reverse(); // announce in path order via pop()
        tracing::info!(
            target: "replica",
            files = self.pending.len(),
            preset = %preset,
            "session operating"
        );
        self.state = ServerState::Idle;
        Ok(Flow::Continue)
    }

    async fn on_idle(&mut self, packet: Packet) -> Result<Flow> {
        match packet {
            Packet::Request => {
                match self.pending.pop() {
                    Some(info) => {
                        self.channel.send(&Packet::Response { info }).await?;
                    }
                    None => {
                        self.channel.send(&Packet::Done).await?;
                    }
                }
                self.state = ServerState::Idle;
            }
            Packet::Sync { info, action } => {
                self.on_sync(info, action).await?;
            }
            Packet::Download { fileid } => {
                self.on_download(fileid).await?;
            }
            Packet::Upload { fileid } => {
                self.channel.send(&Packet::Confirm { ok: true }).await?;
                self.state = ServerState::Receiving {
                    fileid,
                    meta: None,
                    data: Vec::new(),
                    expected_piece: 0,
                };
            }
            Packet::Done => {
                // stray DONE after an aborted transfer; stay idle
                self.state = ServerState::Idle;
            }
            other => return Err(unexpected("idle-state packet", &other)),
        }
        Ok(Flow::Continue)
    }

    /// Independently recompute the action and confirm only on agreement.
    async fn on_sync(&mut self, client_info: FileInfo, proposed: SyncAction) -> Result<()> {
        let server_info = local_info(self.fs, &client_info.fileid, &client_info.path).await;
        let ours = resolve_action(
            state_of(&client_info).as_ref(),
            state_of(&server_info).as_ref(),
        );
        let ok = ours == proposed;
        self.channel.send(&Packet::Confirm { ok }).await?;
        self.state = ServerState::Idle;
        if !ok {
            tracing::warn!(
                target: "replica",
                fileid = %client_info.fileid,
                ?proposed,
                ?ours,
                "action mismatch"
            );
            self.counter.tick()?;
            return Ok(());
        }
        self.processed.insert(client_info.fileid);
        if proposed == SyncAction::SerDelete {
            delete_file(self.fs, &client_info.fileid).await?;
        }
        Ok(())
    }

    async fn on_download(&mut self, fileid: Uuid) -> Result<()> {
        match self.fs.find(&fileid).await {
            Some((entry, path)) if !entry.deleted => {
                let data = self.fs.load(&path).await?;
                let meta = meta_of(&entry, &path, data.len());
                self.channel.send(&Packet::Confirm { ok: true }).await?;
                self.state = ServerState::Sending { meta, data };
            }
            _ => {
                self.channel.send(&Packet::Confirm { ok: false }).await?;
                self.state = ServerState::Idle;
            }
        }
        Ok(())
    }

    async fn on_sending(&mut self, packet: Packet, meta: FileMeta, data: Vec<u8>) -> Result<Flow> {
        match packet {
            Packet::Get { what, piece } if what == "meta" => {
                self.channel
                    .send(&Packet::Chunk(ChunkPayload::Meta(meta.clone())))
                    .await?;
                let _ = piece;
                self.state = ServerState::Sending { meta, data };
            }
            Packet::Get { what, piece } if what == "data" => {
                if piece >= meta.pieces {
                    self.channel.send(&Packet::Abort).await?;
                    self.state = ServerState::Idle;
                    self.counter.tick()?;
                    return Ok(Flow::Continue);
                }
                let start = piece as usize * CHUNK_SIZE;
                let end = (start + CHUNK_SIZE).min(data.len());
                self.channel
                    .send(&Packet::Chunk(ChunkPayload::Data {
                        piece,
                        data: data[start..end].to_vec(),
                    }))
                    .await?;
                self.state = ServerState::Sending { meta, data };
            }
            Packet::Done => {
                self.state = ServerState::Idle;
            }
            other => return Err(unexpected("GET or DONE", &other)),
        }
        Ok(Flow::Continue)
    }

    async fn on_receiving(
        &mut self,
        packet: Packet,
        fileid: Uuid,
        meta: Option<FileMeta>,
        mut data: Vec<u8>,
        expected_piece: u32,
    ) -> Result<Flow> {
        match packet {
            Packet::Put(ChunkPayload::Meta(new_meta)) => {
                if new_meta.file_id != fileid {
                    self.channel.send(&Packet::Abort).await?;
                    self.counter.tick()?;
                    return Ok(Flow::Continue);
                }
                self.channel
                    .send(&Packet::Received {
                        what: "meta".into(),
                        piece: 0,
                    })
                    .await?;
                self.state = ServerState::Receiving {
                    fileid,
                    meta: Some(new_meta),
                    data,
                    expected_piece,
                };
            }
            Packet::Put(ChunkPayload::Data { piece, data: chunk }) => {
                if piece != expected_piece {
                    self.channel.send(&Packet::Abort).await?;
                    self.counter.tick()?;
                    return Ok(Flow::Continue);
                }
                data.extend_from_slice(&chunk);
                self.channel
                    .send(&Packet::Received {
                        what: "data".into(),
                        piece,
                    })
                    .await?;
                self.state = ServerState::Receiving {
                    fileid,
                    meta,
                    data,
                    expected_piece: piece + 1,
                };
            }
            Packet::Done => {
                let outcome = match meta {
                    Some(meta) => apply_file(self.fs, &meta, &data).await,
                    None => Err(ReplicaError::Protocol("upload finished without meta".into())),
                };
                match outcome {
                    Ok(()) => {
                        self.processed.insert(fileid);
                    }
                    Err(e) if e.is_abortable() => {
                        tracing::warn!(target: "replica", error = %e, "upload discarded");
                        self.channel.send(&Packet::Abort).await?;
                        self.counter.tick()?;
                    }
                    Err(e) => return Err(e),
                }
                self.state = ServerState::Idle;
            }
            other => return Err(unexpected("PUT or DONE", &other)),
        }
        Ok(Flow::Continue)
    }
}

fn unexpected(wanted: &str, got: &Packet) -> ReplicaError {
    ReplicaError::Protocol(format!("expected {wanted}, got {got:?}"))
}
