//! Wire packets.
//!
//! Every frame is `u32 length || u8 type || body`; body fields are `u32`
//! (big-endian), `u8`, `bool` (one byte), `string` (`u32 len || bytes`) and
//! `uuid` (16 raw bytes). Timestamps travel as ISO-8601 strings.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::action::SyncAction;
use crate::{ReplicaError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;
/// Plaintext transfer chunk size.
pub const CHUNK_SIZE: usize = 1 << 15;
/// Longest accepted string field.
const STRING_MAX: usize = 4096;

/// Per-file sync state as seen by one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub fileid: Uuid,
    pub path: String,
    pub modified: DateTime<Utc>,
    pub deleted: bool,
    /// False when this side has no file with this id at all.
    pub exists: bool,
}

impl FileInfo {
    /// Placeholder for "no such file on this side".
    pub fn absent(fileid: Uuid, path: &str) -> Self {
        FileInfo {
            fileid,
            path: path.to_string(),
            modified: DateTime::<Utc>::UNIX_EPOCH,
            deleted: false,
            exists: false,
        }
    }
}

/// Transfer metadata, the body of a `meta` chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub pieces: u32,
    pub size: u32,
    pub filename: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub owner: Uuid,
    pub file_id: Uuid,
    pub user: String,
    pub group: String,
    pub perms: u32,
}

/// Payload of CHUNK and PUT packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPayload {
    Meta(FileMeta),
    Data { piece: u32, data: Vec<u8> },
}

/// The closed packet set.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Init { version: u32 },
    Version { version: u32 },
    Operation {
        version: u32,
        preset_modified: DateTime<Utc>,
        preset: String,
        /// Explicit patterns for the `custom` preset; empty otherwise.
        patterns: Vec<String>,
    },
    Confirm { ok: bool },
    Request,
    Response { info: FileInfo },
    Done,
    Sync { info: FileInfo, action: SyncAction },
    Download { fileid: Uuid },
    Get { what: String, piece: u32 },
    Chunk(ChunkPayload),
    Upload { fileid: Uuid },
    Put(ChunkPayload),
    Received { what: String, piece: u32 },
    Close,
    Abort,
}

impl Packet {
    fn type_byte(&self) -> u8 {
        match self {
            Packet::Init { .. } => 1,
            Packet::Version { .. } => 2,
            Packet::Operation { .. } => 3,
            Packet::Confirm { .. } => 4,
            Packet::Request => 5,
            Packet::Response { .. } => 6,
            Packet::Done => 7,
            Packet::Sync { .. } => 8,
            Packet::Download { .. } => 9,
            Packet::Get { .. } => 10,
            Packet::Chunk(_) => 11,
            Packet::Upload { .. } => 12,
            Packet::Put(_) => 13,
            Packet::Received { .. } => 14,
            Packet::Close => 15,
            Packet::Abort => 16,
        }
    }

    /// `u8 type || body` (the frame length prefix is the channel's job).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(self.type_byte());
        match self {
            Packet::Init { version } | Packet::Version { version } => w.u32(*version),
            Packet::Operation {
                version,
                preset_modified,
                preset,
                patterns,
            } => {
                w.u32(*version);
                w.time(preset_modified);
                w.string(preset);
                w.u32(patterns.len() as u32);
                for pattern in patterns {
                    w.string(pattern);
                }
            }
            Packet::Confirm { ok } => w.boolean(*ok),
            Packet::Request | Packet::Done | Packet::Close | Packet::Abort => {}
            Packet::Response { info } => w.info(info),
            Packet::Sync { info, action } => {
                w.info(info);
                w.byte(action.to_byte());
            }
            Packet::Download { fileid } | Packet::Upload { fileid } => w.uuid(fileid),
            Packet::Get { what, piece } | Packet::Received { what, piece } => {
                w.string(what);
                w.u32(*piece);
            }
            Packet::Chunk(payload) | Packet::Put(payload) => w.chunk(payload),
        }
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((&type_byte, body)) = bytes.split_first() else {
            return Err(ReplicaError::Protocol("empty frame".into()));
        };
        let mut r = Reader::new(body);
        let packet = match type_byte {
            1 => Packet::Init { version: r.u32()? },
            2 => Packet::Version { version: r.u32()? },
            3 => {
                let version = r.u32()?;
                let preset_modified = r.time()?;
                let preset = r.string()?;
                let count = r.u32()? as usize;
                if count > 64 {
                    return Err(ReplicaError::Protocol(format!("{count} patterns")));
                }
                let mut patterns = Vec::with_capacity(count);
                for _ in 0..count {
                    patterns.push(r.string()?);
                }
                Packet::Operation {
                    version,
                    preset_modified,
                    preset,
                    patterns,
                }
            }
            4 => Packet::Confirm { ok: r.boolean()? },
            5 => Packet::Request,
            6 => Packet::Response { info: r.info()? },
            7 => Packet::Done,
            8 => Packet::Sync {
                info: r.info()?,
                action: SyncAction::from_byte(r.byte()?)?,
            },
            9 => Packet::Download { fileid: r.uuid()? },
            10 => Packet::Get {
                what: r.string()?,
                piece: r.u32()?,
            },
            11 => Packet::Chunk(r.chunk()?),
            12 => Packet::Upload { fileid: r.uuid()? },
            13 => Packet::Put(r.chunk()?),
            14 => Packet::Received {
                what: r.string()?,
                piece: r.u32()?,
            },
            15 => Packet::Close,
            16 => Packet::Abort,
            other => {
                return Err(ReplicaError::Protocol(format!(
                    "unknown packet type {other}"
                )))
            }
        };
        r.expect_end()?;
        Ok(packet)
    }
}

struct Writer(Vec<u8>);

impl Writer {
    fn new(type_byte: u8) -> Self {
        Writer(vec![type_byte])
    }

    fn u32(&mut self, value: u32) {
        self.0.extend_from_slice(&value.to_be_bytes());
    }

    fn byte(&mut self, value: u8) {
        self.0.push(value);
    }

    fn boolean(&mut self, value: bool) {
        self.0.push(value as u8);
    }

    fn string(&mut self, value: &str) {
        self.u32(value.len() as u32);
        self.0.extend_from_slice(value.as_bytes());
    }

    fn uuid(&mut self, value: &Uuid) {
        self.0.extend_from_slice(value.as_bytes());
    }

    fn time(&mut self, value: &DateTime<Utc>) {
        self.string(&value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }

    fn bytes(&mut self, value: &[u8]) {
        self.u32(value.len() as u32);
        self.0.extend_from_slice(value);
    }

    fn info(&mut self, info: &FileInfo) {
        self.uuid(&info.fileid);
        self.string(&info.path);
        self.time(&info.modified);
        self.boolean(info.deleted);
        self.boolean(info.exists);
    }

    fn chunk(&mut self, payload: &ChunkPayload) {
        match payload {
            ChunkPayload::Meta(meta) => {
                self.string("meta");
                self.u32(meta.pieces);
                self.u32(meta.size);
                self.string(&meta.filename);
                self.time(&meta.created);
                self.time(&meta.modified);
                self.uuid(&meta.owner);
                self.uuid(&meta.file_id);
                self.string(&meta.user);
                self.string(&meta.group);
                self.u32(meta.perms);
            }
            ChunkPayload::Data { piece, data } => {
                self.string("data");
                self.u32(*piece);
                self.bytes(data);
            }
        }
    }

    fn finish(self) -> Vec<u8> {
        self.0
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ReplicaError::Protocol("truncated packet body".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn boolean(&mut self) -> Result<bool> {
        match self.byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ReplicaError::Protocol(format!("bad bool byte {other}"))),
        }
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        if len > STRING_MAX {
            return Err(ReplicaError::Protocol(format!("string of {len} bytes")));
        }
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| ReplicaError::Protocol("string not utf-8".into()))
    }

    fn uuid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_slice(self.take(16)?).expect("16 bytes"))
    }

    fn time(&mut self) -> Result<DateTime<Utc>> {
        let text = self.string()?;
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| ReplicaError::Protocol(format!("bad timestamp {text:?}")))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        if len > CHUNK_SIZE + 64 {
            return Err(ReplicaError::Protocol(format!("chunk of {len} bytes")));
        }
        Ok(self.take(len)?.to_vec())
    }

    fn info(&mut self) -> Result<FileInfo> {
        Ok(FileInfo {
            fileid: self.uuid()?,
            path: self.string()?,
            modified: self.time()?,
            deleted: self.boolean()?,
            exists: self.boolean()?,
        })
    }

    fn chunk(&mut self) -> Result<ChunkPayload> {
        let what = self.string()?;
        match what.as_str() {
            "meta" => Ok(ChunkPayload::Meta(FileMeta {
                pieces: self.u32()?,
                size: self.u32()?,
                filename: self.string()?,
                created: self.time()?,
                modified: self.time()?,
                owner: self.uuid()?,
                file_id: self.uuid()?,
                user: self.string()?,
                group: self.string()?,
                perms: self.u32()?,
            })),
            "data" => Ok(ChunkPayload::Data {
                piece: self.u32()?,
                data: self.bytes()?,
            }),
            other => Err(ReplicaError::Protocol(format!("unknown chunk kind {other:?}"))),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(ReplicaError::Protocol("trailing bytes in packet".into()));
        }
        Ok(())
    }
}
