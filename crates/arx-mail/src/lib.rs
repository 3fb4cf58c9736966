//! Store-and-forward messaging.
//!
//! [`wrap`] seals a signed mail into an [`Envelope`] addressed to one
//! recipient; [`open`] undoes it, refusing loudly on any verification or
//! validation failure. [`Mailbox`] manages the conventional vault folders
//! and enforces the store-and-forward invariant: a successfully opened
//! letter leaves an evidence copy in the cache before the envelope leaves
//! the inbox.

mod error;
mod mailbox;
mod wrap;

pub use error::MailError;
pub use mailbox::Mailbox;
pub use wrap::{compose_signed, open, receive, route, wrap};

/// Result alias for this crate.
pub type Result<T, E = MailError> = std::result::Result<T, E>;
