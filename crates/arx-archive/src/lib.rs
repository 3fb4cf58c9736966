//! Encrypted single-file archive.
//!
//! An archive image is one file divided into fixed-size blocks. Block 0
//! carries the format header; every other block belongs to exactly one
//! stream (a forward-chained byte sequence) or to the free list. Blocks are
//! sealed individually with XChaCha20-Poly1305 under keys derived from the
//! archive master key; the per-block nonce is a keyed BLAKE2b of the block
//! index, so nothing random needs to be stored next to the ciphertext.
//!
//! [`streams::StreamManager`] owns the raw block layer. [`fs::ArchiveFs`]
//! layers a POSIX-ish filesystem over it: an entry table of fixed records
//! describing files, directories and links, with content stored one stream
//! per file. All mutations on an archive are serialized behind one lock and
//! become durable only at `sync()`.

pub mod entry;
pub mod error;
pub mod fs;
pub mod glob;
pub mod header;
pub mod query;
pub mod streams;

pub use entry::{Entry, EntryKind};
pub use error::ArchiveError;
pub use fs::{ArchiveFs, FileOptions, RemoveMode};
pub use header::ArchiveHeader;
pub use query::{DeletedFilter, KindFilter, Query};
pub use streams::{StreamId, StreamManager};

/// Result alias for this crate.
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
