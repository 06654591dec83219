//! Directory entries
//!
//! Every entry in the container has a directory record describing its
//! namespace, url, title and either where its payload lives (cluster + blob)
//! or which entry it redirects to.

use super::error::ContainerError;
use super::header::ByteReader;

pub const MIME_REDIRECT: u16 = 0xFFFF;
pub const MIME_LINK_TARGET: u16 = 0xFFFE;
pub const MIME_DELETED: u16 = 0xFFFD;

/// Upper bound on a directory record's size; url + title are rarely > 1 KB.
pub(crate) const MAX_DIRENT_LEN: usize = 64 * 1024;

/// Where an entry's content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryBody {
    /// Payload stored as blob `blob` of cluster `cluster`
    Content { cluster: u32, blob: u32 },
    /// Pointer to another entry by index
    Redirect { target: u32 },
    /// Link target or deleted entry, carries no payload
    Empty,
}

/// One addressable entry of the container (metadata only).
///
/// The payload is read on demand through [`super::Archive::read_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Position in the url-ordered entry list
    pub index: u32,
    /// Namespace character (`A`, `C`, `I`, `M`, `-`, ...)
    pub namespace: char,
    /// Namespace-qualified url, e.g. `A/Foo`
    pub url: String,
    /// Title; equals the path part of the url when the container stores none
    pub title: String,
    /// Mimetype for content entries
    pub mimetype: Option<String>,
    pub body: EntryBody,
}

impl ContainerEntry {
    /// The url without its namespace prefix.
    pub fn path(&self) -> &str {
        self.url
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or(&self.url)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.body, EntryBody::Redirect { .. })
    }

    pub fn redirect_target(&self) -> Option<u32> {
        match self.body {
            EntryBody::Redirect { target } => Some(target),
            _ => None,
        }
    }
}

/// Whether `buf` holds a whole directory record, both string terminators
/// and the extra parameters included.
pub(crate) fn dirent_is_complete(buf: &[u8]) -> bool {
    if buf.len() < 8 {
        return false;
    }
    let mime_code = u16::from_le_bytes([buf[0], buf[1]]);
    let param_len = buf[2] as usize;
    let fixed = match mime_code {
        MIME_REDIRECT => 12,
        MIME_LINK_TARGET | MIME_DELETED => 8,
        _ => 16,
    };
    let Some(strings) = buf.get(fixed..) else {
        return false;
    };

    let mut terminators = strings
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == 0)
        .map(|(i, _)| i);
    match (terminators.next(), terminators.next()) {
        (Some(_), Some(title_end)) => strings.len() >= title_end + 1 + param_len,
        _ => false,
    }
}

/// Parse a directory record at the start of `buf`.
pub fn parse_dirent(
    index: u32,
    buf: &[u8],
    mime_types: &[String],
) -> Result<ContainerEntry, ContainerError> {
    // mimetype(2) + param len(1) + namespace(1) + revision(4)
    if buf.len() < 8 {
        return Err(ContainerError::entry(index, "directory record truncated"));
    }

    let mut r = ByteReader::new(buf);
    let mime_code = r.u16();
    let param_len = r.u8() as usize;
    let namespace = r.u8() as char;
    let _revision = r.u32();

    let (body, mimetype) = match mime_code {
        MIME_REDIRECT => {
            if r.remaining() < 4 {
                return Err(ContainerError::entry(index, "redirect record truncated"));
            }
            (EntryBody::Redirect { target: r.u32() }, None)
        }
        MIME_LINK_TARGET | MIME_DELETED => (EntryBody::Empty, None),
        code => {
            if r.remaining() < 8 {
                return Err(ContainerError::entry(index, "content record truncated"));
            }
            let cluster = r.u32();
            let blob = r.u32();
            let mime = mime_types.get(code as usize).cloned().ok_or_else(|| {
                ContainerError::entry(index, format!("unknown mimetype index {}", code))
            })?;
            (EntryBody::Content { cluster, blob }, Some(mime))
        }
    };

    let path = r
        .cstr()
        .ok_or_else(|| ContainerError::entry(index, "url is not terminated"))?;
    let title = r
        .cstr()
        .ok_or_else(|| ContainerError::entry(index, "title is not terminated"))?;
    if r.remaining() < param_len {
        return Err(ContainerError::entry(index, "extra parameters truncated"));
    }

    let path = String::from_utf8(path.to_vec())
        .map_err(|e| ContainerError::entry(index, format!("url is not UTF-8: {}", e)))?;
    let title = if title.is_empty() {
        path.clone()
    } else {
        String::from_utf8_lossy(title).into_owned()
    };

    Ok(ContainerEntry {
        index,
        namespace,
        url: format!("{}/{}", namespace, path),
        title,
        mimetype,
        body,
    })
}

/// Serialize a directory record (used by the fixture builder).
#[cfg(any(test, feature = "test-util"))]
pub(crate) fn encode_dirent(
    mime_code: u16,
    namespace: char,
    body: EntryBody,
    path: &str,
    title: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + path.len() + title.len());
    out.extend_from_slice(&mime_code.to_le_bytes());
    out.push(0); // no extra parameters
    out.push(namespace as u8);
    out.extend_from_slice(&0u32.to_le_bytes());
    match body {
        EntryBody::Content { cluster, blob } => {
            out.extend_from_slice(&cluster.to_le_bytes());
            out.extend_from_slice(&blob.to_le_bytes());
        }
        EntryBody::Redirect { target } => out.extend_from_slice(&target.to_le_bytes()),
        EntryBody::Empty => {}
    }
    out.extend_from_slice(path.as_bytes());
    out.push(0);
    if title != path {
        out.extend_from_slice(title.as_bytes());
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mimes() -> Vec<String> {
        vec!["text/html".to_string(), "image/png".to_string()]
    }

    #[test]
    fn test_parse_content_entry() {
        let bytes = encode_dirent(
            0,
            'A',
            EntryBody::Content { cluster: 2, blob: 5 },
            "Foo_Bar",
            "Foo Bar",
        );
        let entry = parse_dirent(9, &bytes, &mimes()).unwrap();

        assert_eq!(entry.index, 9);
        assert_eq!(entry.namespace, 'A');
        assert_eq!(entry.url, "A/Foo_Bar");
        assert_eq!(entry.path(), "Foo_Bar");
        assert_eq!(entry.title, "Foo Bar");
        assert_eq!(entry.mimetype.as_deref(), Some("text/html"));
        assert_eq!(entry.body, EntryBody::Content { cluster: 2, blob: 5 });
    }

    #[test]
    fn test_empty_title_falls_back_to_path() {
        let bytes = encode_dirent(1, 'I', EntryBody::Content { cluster: 0, blob: 0 }, "a.png", "a.png");
        let entry = parse_dirent(0, &bytes, &mimes()).unwrap();
        assert_eq!(entry.title, "a.png");
        assert_eq!(entry.mimetype.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_parse_redirect_entry() {
        let bytes = encode_dirent(MIME_REDIRECT, 'A', EntryBody::Redirect { target: 3 }, "B", "B");
        let entry = parse_dirent(1, &bytes, &mimes()).unwrap();
        assert!(entry.is_redirect());
        assert_eq!(entry.redirect_target(), Some(3));
        assert_eq!(entry.mimetype, None);
    }

    #[test]
    fn test_unknown_mimetype_is_entry_error() {
        let bytes = encode_dirent(7, 'A', EntryBody::Content { cluster: 0, blob: 0 }, "X", "X");
        let err = parse_dirent(4, &bytes, &mimes()).unwrap_err();
        assert!(matches!(err, ContainerError::EntryRead { index: 4, .. }));
    }

    #[test]
    fn test_record_completeness() {
        let bytes = encode_dirent(0, 'A', EntryBody::Content { cluster: 0, blob: 0 }, "Foo", "Foo bar");
        assert!(dirent_is_complete(&bytes));
        for cut in 0..bytes.len() {
            assert!(!dirent_is_complete(&bytes[..cut]), "complete at {} bytes", cut);
        }

        let redirect = encode_dirent(MIME_REDIRECT, 'A', EntryBody::Redirect { target: 1 }, "B", "B");
        assert!(dirent_is_complete(&redirect));
        assert!(!dirent_is_complete(&redirect[..redirect.len() - 1]));

        let mut with_params = bytes.clone();
        with_params[2] = 4;
        assert!(!dirent_is_complete(&with_params));
        with_params.extend_from_slice(&[9, 9, 9, 9]);
        assert!(dirent_is_complete(&with_params));
    }

    #[test]
    fn test_unterminated_url_is_entry_error() {
        let mut bytes = encode_dirent(0, 'A', EntryBody::Content { cluster: 0, blob: 0 }, "X", "X");
        bytes.truncate(bytes.len() - 2);
        assert!(parse_dirent(0, &bytes, &mimes()).is_err());
    }
}
