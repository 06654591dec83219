//! Article assembly and image reference extraction

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use url::Url;

use crate::zim::ContainerEntry;

use super::types::ResolvedArticle;

/// Root that archive urls are resolved under.
const ARCHIVE_ROOT: &str = "zim:///";

/// Build the output row for an article entry from its HTML payload.
pub fn build_article(entry: &ContainerEntry, payload: &[u8]) -> ResolvedArticle {
    let content = String::from_utf8_lossy(payload).into_owned();
    let image_refs = image_refs(&content, &entry.url);
    ResolvedArticle {
        url: entry.url.clone(),
        title: normalize_title(&entry.title),
        content,
        image_refs,
    }
}

/// Titles are stored with spaces where the container uses underscores.
pub fn normalize_title(title: &str) -> String {
    title.replace('_', " ")
}

/// Archive urls of the images referenced by `html`, resolved against the
/// url of the article containing it. External and inline images are left out.
pub fn image_refs(html: &str, article_url: &str) -> Vec<String> {
    let Some(base) = article_base(article_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let selector = match Selector::parse("img[src]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for element in document.select(&selector) {
        if let Some(src) = element.value().attr("src") {
            if let Some(url) = resolve_against(&base, src) {
                if seen.insert(url.clone()) {
                    refs.push(url);
                }
            }
        }
    }

    refs
}

/// Resolve a link found in the article at `article_url` to an archive url.
pub fn resolve_link(article_url: &str, link: &str) -> Option<String> {
    resolve_against(&article_base(article_url)?, link)
}

/// The article url as an absolute url inside the archive root.
fn article_base(article_url: &str) -> Option<Url> {
    let mut base = Url::parse(ARCHIVE_ROOT).ok()?;
    // set_path escapes `?` and `#`, which are legal in archive urls
    base.set_path(&format!("/{}", article_url));
    Some(base)
}

fn resolve_against(base: &Url, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }

    let url = base.join(link).ok()?;
    if url.scheme() != base.scheme() || url.host_str().is_some_and(|h| !h.is_empty()) {
        return None;
    }

    let path = percent_decode_str(url.path()).decode_utf8().ok()?;
    let path = path.trim_start_matches('/');
    // every archive url carries a namespace
    match path.split_once('/') {
        Some((namespace, rest)) if !namespace.is_empty() && !rest.is_empty() => {
            Some(path.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::EntryBody;

    #[test]
    fn test_legacy_namespace_links() {
        assert_eq!(resolve_link("A/Alpha", "../I/pic.png").as_deref(), Some("I/pic.png"));
        assert_eq!(resolve_link("A/Alpha", "Beta").as_deref(), Some("A/Beta"));
        assert_eq!(resolve_link("A/dir/Page", "../../I/x.jpg").as_deref(), Some("I/x.jpg"));
    }

    #[test]
    fn test_unified_namespace_links() {
        assert_eq!(resolve_link("C/Foo", "img/a.png").as_deref(), Some("C/img/a.png"));
        assert_eq!(resolve_link("C/Foo", "./a.png?x=1#frag").as_deref(), Some("C/a.png"));
        assert_eq!(resolve_link("C/Foo", "/I/a.png").as_deref(), Some("I/a.png"));
    }

    #[test]
    fn test_external_and_escaping_links_are_ignored() {
        assert_eq!(resolve_link("A/Alpha", "https://example.org/a.png"), None);
        assert_eq!(resolve_link("A/Alpha", "//cdn.example.org/a.png"), None);
        assert_eq!(resolve_link("A/Alpha", "data:image/png;base64,AAAA"), None);
        assert_eq!(resolve_link("A/Alpha", "../../../a.png"), None);
        assert_eq!(resolve_link("A/Alpha", "../a.png"), None);
        assert_eq!(resolve_link("A/Alpha", ""), None);
    }

    #[test]
    fn test_escaped_links_are_decoded() {
        assert_eq!(
            resolve_link("A/Page", "../I/Caf%C3%A9.png").as_deref(),
            Some("I/Café.png")
        );
        assert_eq!(
            resolve_link("A/Page", "../I/Two%20Words.jpg").as_deref(),
            Some("I/Two Words.jpg")
        );
        assert_eq!(resolve_link("A/Page", "../I/Café.png").as_deref(), Some("I/Café.png"));
        assert_eq!(
            image_refs("<img src=\"../I/Caf%C3%A9.png\">", "A/Page"),
            vec!["I/Café.png"]
        );
    }

    #[test]
    fn test_article_urls_with_query_characters() {
        assert_eq!(resolve_link("A/What?", "../I/q.png").as_deref(), Some("I/q.png"));
        assert_eq!(resolve_link("A/Why#Not", "Other").as_deref(), Some("A/Other"));
    }

    #[test]
    fn test_image_refs_are_deduplicated_in_order() {
        let html = r#"<html><body>
            <img src="../I/b.png"><p>text</p>
            <img src="../I/a.png" alt="a">
            <img src="../I/b.png">
            <img alt="no source">
            <img src="http://example.org/remote.png">
        </body></html>"#;
        assert_eq!(image_refs(html, "A/Page"), vec!["I/b.png", "I/a.png"]);
    }

    #[test]
    fn test_build_article() {
        let entry = ContainerEntry {
            index: 3,
            namespace: 'A',
            url: "A/Hello_World".into(),
            title: "Hello_World".into(),
            mimetype: Some("text/html".into()),
            body: EntryBody::Content { cluster: 0, blob: 0 },
        };
        let article = build_article(&entry, b"<p>Hi <img src=\"../I/w.png\"></p>");
        assert_eq!(article.url, "A/Hello_World");
        assert_eq!(article.title, "Hello World");
        assert_eq!(article.content, "<p>Hi <img src=\"../I/w.png\"></p>");
        assert_eq!(article.image_refs, vec!["I/w.png"]);
    }
}
