//! Logical vault paths under the archive root.

use uuid::Uuid;

use crate::kind::DocKind;

pub const PORTFOLIOS: &str = "/portfolios";
pub const CONTACTS: &str = "/contacts";
pub const CONTACT_FOLDERS: [&str; 4] = ["favorites", "friends", "all", "blocked"];
pub const MESSAGES: &str = "/messages";
pub const MESSAGE_FOLDERS: [&str; 6] = ["inbox", "outbox", "read", "drafts", "sent", "trash"];
pub const CACHE_MSG: &str = "/cache/msg";
pub const SETTINGS: &str = "/settings";

/// `/portfolios/<entity>`.
pub fn portfolio_dir(entity: &Uuid) -> String {
    format!("{PORTFOLIOS}/{entity}")
}

/// `/portfolios/<entity>/<doc>.<ext>`.
pub fn doc_path(entity: &Uuid, doc: &Uuid, kind: DocKind) -> Option<String> {
    kind.extension()
        .map(|ext| format!("{PORTFOLIOS}/{entity}/{doc}.{ext}"))
}

/// `/messages/<folder>/<doc>.<ext>`.
pub fn message_path(folder: &str, doc: &Uuid, kind: DocKind) -> Option<String> {
    kind.extension()
        .map(|ext| format!("{MESSAGES}/{folder}/{doc}.{ext}"))
}

/// `/cache/msg/<letter>.cml`.
pub fn stored_letter_path(letter: &Uuid) -> String {
    format!("{CACHE_MSG}/{letter}.cml")
}

/// `/contacts/<folder>/<entity>`.
pub fn contact_path(folder: &str, entity: &Uuid) -> String {
    format!("{CONTACTS}/{folder}/{entity}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_have_expected_shape() {
        let e = Uuid::nil();
        let d = Uuid::nil();
        assert_eq!(
            doc_path(&e, &d, DocKind::Person).unwrap(),
            format!("/portfolios/{e}/{d}.ent")
        );
        assert_eq!(
            message_path("inbox", &d, DocKind::Envelope).unwrap(),
            format!("/messages/inbox/{d}.env")
        );
        assert!(doc_path(&e, &d, DocKind::Attachment).is_none());
    }
}
