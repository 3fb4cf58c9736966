//! Signed document graph.
//!
//! Documents are typed, immutable records with a canonical byte form that
//! feeds signing, hashing and storage alike. Portfolios aggregate the
//! documents of one entity and guard every mutation behind a validate
//! phase whose rule outcomes are collected in a task-local [`Report`];
//! acceptance is all-or-nothing.

pub mod document;
pub mod error;
pub mod field;
pub mod kind;
pub mod paths;
pub mod portfolio;
pub mod report;
pub mod stamp;
pub mod store;
pub mod types;

pub use document::{immutable_fields_match, AnyDocument, Document};

/// Wall-clock UTC truncated to whole seconds, the resolution of every
/// serialized timestamp. Always use this for document timestamps so a
/// round-trip through the canonical form stays byte-identical.
pub fn now_utc() -> chrono::DateTime<chrono::Utc> {
    use chrono::SubsecRound;
    chrono::Utc::now().trunc_subsecs(0)
}
pub use error::{DocError, Result};
pub use kind::DocKind;
pub use portfolio::{Portfolio, PrivatePortfolio};
pub use report::{check, check_that, evaluate, Report};
pub use stamp::Stamp;
pub use store::{assemble_portfolio, DocCache, PortfolioStore};
