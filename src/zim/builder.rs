//! Minimal ZIM writer
//!
//! Produces small but structurally valid containers: sorted directory,
//! url and title pointer lists, and clusters in any supported compression.
//! Used to build fixtures for tests and for smoke-testing converters without
//! downloading a real archive. The checksum is written as zeros.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use super::cluster::{Cluster, Compression};
use super::dirent::{encode_dirent, EntryBody, MIME_REDIRECT};
use super::header::{Header, HEADER_LEN, NO_MAIN_PAGE};

#[derive(Debug, Clone)]
enum PendingBody {
    Content { mimetype: String, data: Vec<u8> },
    Redirect { target_url: String },
}

#[derive(Debug, Clone)]
struct PendingEntry {
    url: String,
    title: String,
    body: PendingBody,
}

/// Builder for small ZIM containers
#[derive(Debug, Clone)]
pub struct ZimBuilder {
    entries: Vec<PendingEntry>,
    compression: Compression,
    blobs_per_cluster: usize,
    main_page: Option<String>,
    minor_version: u16,
}

impl Default for ZimBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZimBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            compression: Compression::Zstd,
            blobs_per_cluster: 16,
            main_page: None,
            minor_version: 1,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_blobs_per_cluster(mut self, n: usize) -> Self {
        self.blobs_per_cluster = n.max(1);
        self
    }

    pub fn with_main_page(mut self, url: impl Into<String>) -> Self {
        self.main_page = Some(url.into());
        self
    }

    /// Add an HTML article. `url` is namespace-qualified (`A/Foo`).
    pub fn article(self, url: impl Into<String>, title: impl Into<String>, html: impl Into<String>) -> Self {
        self.content(url, title, "text/html", html.into().into_bytes())
    }

    /// Add an image entry; its title is the url path.
    pub fn image(self, url: impl Into<String>, mimetype: impl Into<String>, data: Vec<u8>) -> Self {
        let url = url.into();
        let title = url.split_once('/').map(|(_, p)| p.to_string()).unwrap_or_default();
        self.content(url, title, mimetype, data)
    }

    /// Add an arbitrary content entry.
    pub fn content(
        mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        mimetype: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.entries.push(PendingEntry {
            url: url.into(),
            title: title.into(),
            body: PendingBody::Content {
                mimetype: mimetype.into(),
                data,
            },
        });
        self
    }

    /// Add a redirect to another entry's url.
    pub fn redirect(mut self, url: impl Into<String>, title: impl Into<String>, target_url: impl Into<String>) -> Self {
        self.entries.push(PendingEntry {
            url: url.into(),
            title: title.into(),
            body: PendingBody::Redirect {
                target_url: target_url.into(),
            },
        });
        self
    }

    /// Serialize the container to bytes.
    pub fn build(&self) -> std::io::Result<Vec<u8>> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.url.cmp(&b.url));

        let index_of: HashMap<&str, u32> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.url.as_str(), i as u32))
            .collect();

        // Mime list in first-seen order
        let mut mime_types: Vec<String> = Vec::new();
        for entry in &entries {
            if let PendingBody::Content { mimetype, .. } = &entry.body {
                if !mime_types.contains(mimetype) {
                    mime_types.push(mimetype.clone());
                }
            }
        }

        // Assign blobs to clusters and encode directory records
        let mut clusters: Vec<Vec<Vec<u8>>> = Vec::new();
        let mut dirents = Vec::with_capacity(entries.len());
        for entry in &entries {
            let (namespace, path) = split_url(&entry.url)?;
            let record = match &entry.body {
                PendingBody::Content { mimetype, data } => {
                    if clusters.last().map_or(true, |c| c.len() >= self.blobs_per_cluster) {
                        clusters.push(Vec::new());
                    }
                    let last = clusters.len() - 1;
                    let cluster = last as u32;
                    let blob = clusters[last].len() as u32;
                    clusters[last].push(data.clone());

                    let mime_code = mime_types.iter().position(|m| m == mimetype).unwrap_or(0) as u16;
                    encode_dirent(mime_code, namespace, EntryBody::Content { cluster, blob }, path, &entry.title)
                }
                PendingBody::Redirect { target_url } => {
                    let target = *index_of.get(target_url.as_str()).ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            format!("redirect target {} not in container", target_url),
                        )
                    })?;
                    encode_dirent(MIME_REDIRECT, namespace, EntryBody::Redirect { target }, path, &entry.title)
                }
            };
            dirents.push(record);
        }

        let encoded_clusters: Vec<Vec<u8>> = clusters
            .iter()
            .map(|blobs| Cluster::encode(blobs, self.compression))
            .collect::<std::io::Result<_>>()?;

        // Layout: header | mime list | url ptrs | title ptrs | dirents | cluster ptrs | clusters | checksum
        let mut mime_list = Vec::new();
        for mime in &mime_types {
            mime_list.extend_from_slice(mime.as_bytes());
            mime_list.push(0);
        }
        mime_list.push(0);

        let mime_list_pos = HEADER_LEN as u64;
        let url_ptr_pos = mime_list_pos + mime_list.len() as u64;
        let title_ptr_pos = url_ptr_pos + entries.len() as u64 * 8;
        let dirents_pos = title_ptr_pos + entries.len() as u64 * 4;
        let dirents_len: u64 = dirents.iter().map(|d| d.len() as u64).sum();
        let cluster_ptr_pos = dirents_pos + dirents_len;
        let clusters_pos = cluster_ptr_pos + encoded_clusters.len() as u64 * 8;
        let clusters_len: u64 = encoded_clusters.iter().map(|c| c.len() as u64).sum();
        let checksum_pos = clusters_pos + clusters_len;

        let main_page = self
            .main_page
            .as_deref()
            .and_then(|url| index_of.get(url).copied())
            .unwrap_or(NO_MAIN_PAGE);

        let header = Header {
            major_version: 6,
            minor_version: self.minor_version,
            uuid: [0x5A; 16],
            entry_count: entries.len() as u32,
            cluster_count: encoded_clusters.len() as u32,
            url_ptr_pos,
            title_ptr_pos,
            cluster_ptr_pos,
            mime_list_pos,
            main_page,
            layout_page: NO_MAIN_PAGE,
            checksum_pos,
        };

        let mut out = Vec::with_capacity((checksum_pos + 16) as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&mime_list);

        let mut offset = dirents_pos;
        for dirent in &dirents {
            out.extend_from_slice(&offset.to_le_bytes());
            offset += dirent.len() as u64;
        }

        let mut by_title: Vec<u32> = (0..entries.len() as u32).collect();
        by_title.sort_by(|&a, &b| entries[a as usize].title.cmp(&entries[b as usize].title));
        for index in by_title {
            out.extend_from_slice(&index.to_le_bytes());
        }

        for dirent in &dirents {
            out.extend_from_slice(dirent);
        }

        let mut offset = clusters_pos;
        for cluster in &encoded_clusters {
            out.extend_from_slice(&offset.to_le_bytes());
            offset += cluster.len() as u64;
        }
        for cluster in &encoded_clusters {
            out.extend_from_slice(cluster);
        }

        out.extend_from_slice(&[0u8; 16]);
        Ok(out)
    }

    /// Serialize the container and write it to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let bytes = self.build()?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        file.flush()
    }
}

fn split_url(url: &str) -> std::io::Result<(char, &str)> {
    let mut chars = url.chars();
    match (chars.next(), chars.next()) {
        (Some(ns), Some('/')) if ns.is_ascii() => Ok((ns, &url[2..])),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("url {} is not namespace-qualified", url),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_to_unknown_target_fails() {
        let result = ZimBuilder::new().redirect("A/B", "B", "A/Missing").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unqualified_url_fails() {
        let result = ZimBuilder::new().article("Foo", "Foo", "x").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_layout_is_consistent() {
        let bytes = ZimBuilder::new()
            .article("A/One", "One", "1")
            .article("A/Two", "Two", "2")
            .build()
            .unwrap();

        let header = Header::parse(&bytes[..HEADER_LEN], bytes.len() as u64).unwrap();
        assert_eq!(header.entry_count, 2);
        assert_eq!(header.cluster_count, 1);
        assert_eq!(header.checksum_pos + 16, bytes.len() as u64);
    }
}
