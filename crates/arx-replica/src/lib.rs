//! Archive replication.
//!
//! A length-prefixed packet protocol reconciles two archives through
//! per-file sync decisions: the client pulls the server's file list, both
//! sides independently resolve each file against the same action table,
//! and agreed actions move content in 32 KiB chunks over an authenticated,
//! encrypted channel. Disagreements and wire faults abort the file at hand
//! and spend from a fixed abort budget; an exhausted budget ends the
//! session. Exactly one server is authoritative for any archive.

pub mod action;
pub mod channel;
pub mod client;
pub mod error;
pub mod packet;
pub mod preset;
pub mod server;
pub mod session;

pub use action::{resolve_action, FileState, SyncAction};
pub use channel::{HostIdentity, PeerInfo, SecureChannel};
pub use client::ClientSession;
pub use error::{ReplicaError, Result};
pub use packet::{FileInfo, FileMeta, Packet, CHUNK_SIZE, PROTOCOL_VERSION};
pub use preset::Preset;
pub use server::ServerSession;
pub use session::{SessionStats, ThresholdCounter, ABORT_THRESHOLD};
