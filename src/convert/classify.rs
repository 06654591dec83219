//! Namespace classifier

use crate::zim::{ContainerEntry, EntryBody};

use super::types::EntryKind;

/// Namespaces holding reader-visible content. `A`/`I`/`J` are the pre-6.1
/// article, image and user-content namespaces; `C` is the unified one.
const CONTENT_NAMESPACES: [char; 4] = ['A', 'C', 'I', 'J'];

/// Classify an entry from its namespace and mimetype.
pub fn classify(entry: &ContainerEntry) -> EntryKind {
    if !CONTENT_NAMESPACES.contains(&entry.namespace) {
        return EntryKind::Ignorable;
    }

    match entry.body {
        EntryBody::Redirect { .. } => EntryKind::Redirect,
        EntryBody::Empty => EntryKind::Ignorable,
        EntryBody::Content { .. } => match entry.mimetype.as_deref() {
            Some(mime) if is_html(mime) => EntryKind::Article,
            Some(mime) if mime.starts_with("image/") => EntryKind::Image,
            _ => EntryKind::Ignorable,
        },
    }
}

/// `text/html`, possibly with parameters (`text/html; charset=utf-8`).
fn is_html(mime: &str) -> bool {
    mime.split(';')
        .next()
        .is_some_and(|m| m.trim().eq_ignore_ascii_case("text/html"))
}
