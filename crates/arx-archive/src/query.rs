//! Search queries over the archive filesystem. All selectors AND-compose.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entry::{Entry, EntryKind};
use crate::glob::glob_match;

/// Entry-kind selector. Directories are never returned by `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    File,
    Link,
    #[default]
    Both,
}

/// Tombstone selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedFilter {
    #[default]
    Live,
    Deleted,
    Either,
}

/// Declarative filesystem query.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub pattern: Option<String>,
    pub kind: KindFilter,
    pub owner: Option<Uuid>,
    pub created_since: Option<DateTime<Utc>>,
    pub modified_since: Option<DateTime<Utc>>,
    pub deleted: DeletedFilter,
    pub parent: Option<Uuid>,
    /// Resolve links to their targets; the followed entry is reported under
    /// the link's path.
    pub follow: bool,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn kind(mut self, kind: KindFilter) -> Self {
        self.kind = kind;
        self
    }

    pub fn owner(mut self, owner: Uuid) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn created_since(mut self, when: DateTime<Utc>) -> Self {
        self.created_since = Some(when);
        self
    }

    pub fn modified_since(mut self, when: DateTime<Utc>) -> Self {
        self.modified_since = Some(when);
        self
    }

    pub fn deleted(mut self, filter: DeletedFilter) -> Self {
        self.deleted = filter;
        self
    }

    pub fn parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }

    /// Does `entry` at `path` satisfy every selector?
    pub fn matches(&self, entry: &Entry, path: &str) -> bool {
        match self.kind {
            KindFilter::File if entry.kind != EntryKind::File => return false,
            KindFilter::Link if entry.kind != EntryKind::Link => return false,
            _ if entry.kind == EntryKind::Directory => return false,
            _ => {}
        }
        match self.deleted {
            DeletedFilter::Live if entry.deleted => return false,
            DeletedFilter::Deleted if !entry.deleted => return false,
            _ => {}
        }
        if let Some(owner) = self.owner {
            if entry.owner != owner {
                return false;
            }
        }
        if let Some(since) = self.created_since {
            if entry.created < since {
                return false;
            }
        }
        if let Some(since) = self.modified_since {
            if entry.modified < since {
                return false;
            }
        }
        if let Some(parent) = self.parent {
            if entry.parent != parent {
                return false;
            }
        }
        if let Some(pattern) = &self.pattern {
            if !glob_match(pattern, path) {
                return false;
            }
        }
        true
    }
}
