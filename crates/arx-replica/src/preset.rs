//! Sync presets: which slice of the archive a session reconciles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arx_archive::{DeletedFilter, Query};

/// Named replication policy. The well-known presets cover the mailbox
/// flows; `custom` carries its parameters in the OPERATION packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    /// Glob patterns relative to the archive root.
    pub patterns: Vec<String>,
    /// Restrict to entries owned by this entity.
    pub owner: Option<Uuid>,
    /// Only files modified at or after this instant.
    pub modified_since: Option<DateTime<Utc>>,
    /// Last change to the preset definition, negotiated in OPERATION.
    pub modified: DateTime<Utc>,
}

impl Preset {
    /// Everything under `/messages` and the letter cache.
    pub fn mail() -> Self {
        Preset {
            name: "mail".into(),
            patterns: vec![
                "/messages/inbox/*".into(),
                "/messages/outbox/*".into(),
                "/messages/read/*".into(),
                "/messages/sent/*".into(),
                "/cache/msg/*".into(),
            ],
            owner: None,
            modified_since: None,
            modified: DateTime::UNIX_EPOCH,
        }
    }

    /// All portfolio documents.
    pub fn portfolios() -> Self {
        Preset {
            name: "portfolios".into(),
            patterns: vec!["/portfolios/*/*".into()],
            owner: None,
            modified_since: None,
            modified: DateTime::UNIX_EPOCH,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "mail" => Some(Self::mail()),
            "portfolios" => Some(Self::portfolios()),
            _ => None,
        }
    }

    /// Queries covering this preset, tombstones included (the action table
    /// needs them).
    pub fn queries(&self) -> Vec<Query> {
        self.patterns
            .iter()
            .map(|pattern| {
                let mut query = Query::new()
                    .pattern(pattern.clone())
                    .deleted(DeletedFilter::Either);
                if let Some(owner) = self.owner {
                    query = query.owner(owner);
                }
                if let Some(since) = self.modified_since {
                    query = query.modified_since(since);
                }
                query
            })
            .collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("preset serializes")
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}
