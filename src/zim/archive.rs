//! Read-only handle on a ZIM container

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::cluster::Cluster;
use super::dirent::{dirent_is_complete, parse_dirent, ContainerEntry, EntryBody, MAX_DIRENT_LEN};
use super::error::ContainerError;
use super::header::{parse_mime_list, Header, HEADER_LEN, NO_MAIN_PAGE};

/// Default number of decompressed clusters kept per handle
pub const DEFAULT_CLUSTER_CACHE: usize = 8;

/// Upper bound on the MIME list size read at open time
const MAX_MIME_LIST_LEN: u64 = 64 * 1024;

/// First read size for a directory record; doubled until the record fits
const DIRENT_READ_WINDOW: usize = 512;

/// Source of container entries by index.
///
/// Implemented by [`Archive`]; tests provide in-memory lookups.
pub trait EntryLookup {
    /// Fetch entry metadata by index.
    fn lookup(&self, index: u32) -> Result<ContainerEntry, ContainerError>;
}

/// Read-only ZIM container handle.
///
/// Each worker opens its own handle; the file is never written, so handles
/// need no coordination with each other.
pub struct Archive {
    path: PathBuf,
    file: Mutex<File>,
    file_len: u64,
    header: Header,
    mime_types: Vec<String>,
    cluster_cache: Mutex<LruCache<u32, Arc<Cluster>>>,
    bytes_read: AtomicU64,
}

impl Archive {
    /// Open a container with the default cluster cache size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        Self::open_with_cache(path, DEFAULT_CLUSTER_CACHE)
    }

    /// Open a container, keeping up to `cache_size` decompressed clusters.
    pub fn open_with_cache(path: impl AsRef<Path>, cache_size: usize) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(ContainerError::OpenIo)?;
        let file_len = file.metadata().map_err(ContainerError::OpenIo)?.len();

        if file_len < HEADER_LEN as u64 {
            return Err(ContainerError::Truncated(format!(
                "{} is {} bytes, too small for a ZIM header",
                path.display(),
                file_len
            )));
        }

        let mut header_buf = [0u8; HEADER_LEN];
        file.read_exact(&mut header_buf).map_err(ContainerError::OpenIo)?;
        let header = Header::parse(&header_buf, file_len)?;

        let mime_len = MAX_MIME_LIST_LEN.min(file_len - header.mime_list_pos);
        let mut mime_buf = vec![0u8; mime_len as usize];
        file.seek(SeekFrom::Start(header.mime_list_pos))
            .map_err(ContainerError::OpenIo)?;
        file.read_exact(&mut mime_buf).map_err(ContainerError::OpenIo)?;
        let mime_types = parse_mime_list(&mime_buf)?;

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);

        debug!(
            "Opened {} (v{}.{}, {} entries, {} clusters, {} mime types)",
            path.display(),
            header.major_version,
            header.minor_version,
            header.entry_count,
            header.cluster_count,
            mime_types.len()
        );

        Ok(Self {
            path,
            file: Mutex::new(file),
            file_len,
            header,
            mime_types,
            cluster_cache: Mutex::new(LruCache::new(cache_size)),
            bytes_read: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for display and metadata.
    pub fn source_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("container")
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Bytes read from the file through this handle since it was opened.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Index of the main page entry, if the container declares one.
    pub fn main_page(&self) -> Option<u32> {
        (self.header.main_page != NO_MAIN_PAGE).then_some(self.header.main_page)
    }

    /// Read the metadata of entry `index`.
    pub fn entry_at(&self, index: u32) -> Result<ContainerEntry, ContainerError> {
        if index >= self.header.entry_count {
            return Err(ContainerError::IndexOutOfRange {
                index,
                count: self.header.entry_count,
            });
        }

        let ptr_pos = self.header.url_ptr_pos + u64::from(index) * 8;
        let dirent_pos = self.read_u64(ptr_pos)?;
        if dirent_pos >= self.file_len {
            return Err(ContainerError::entry(
                index,
                format!("directory entry offset {} past end of file", dirent_pos),
            ));
        }

        let limit = (self.file_len - dirent_pos).min(MAX_DIRENT_LEN as u64) as usize;
        let mut window = DIRENT_READ_WINDOW.min(limit);
        loop {
            let buf = self.read_at(dirent_pos, window)?;
            if window == limit || dirent_is_complete(&buf) {
                return parse_dirent(index, &buf, &self.mime_types);
            }
            window = (window * 2).min(limit);
        }
    }

    /// Decompress and return the payload of a content entry.
    pub fn read_payload(&self, entry: &ContainerEntry) -> Result<Vec<u8>, ContainerError> {
        let EntryBody::Content { cluster, blob } = entry.body else {
            return Err(ContainerError::entry(entry.index, "entry has no payload"));
        };

        let cluster_data = self
            .cluster(cluster)
            .map_err(|e| ContainerError::entry(entry.index, e.to_string()))?;
        cluster_data
            .blob(blob)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                ContainerError::entry(
                    entry.index,
                    format!("blob {} missing from cluster {}", blob, cluster),
                )
            })
    }

    /// Load a cluster, going through the per-handle cache.
    fn cluster(&self, number: u32) -> Result<Arc<Cluster>, ContainerError> {
        if let Some(cached) = self.cluster_cache.lock().get(&number) {
            return Ok(cached.clone());
        }

        if number >= self.header.cluster_count {
            return Err(ContainerError::cluster(
                number,
                format!("cluster count is {}", self.header.cluster_count),
            ));
        }

        let start = self.read_u64(self.header.cluster_ptr_pos + u64::from(number) * 8)?;
        let end = if number + 1 < self.header.cluster_count {
            self.read_u64(self.header.cluster_ptr_pos + u64::from(number + 1) * 8)?
        } else if self.header.checksum_pos > 0 {
            self.header.checksum_pos
        } else {
            self.file_len
        };

        if start >= end || end > self.file_len {
            return Err(ContainerError::cluster(
                number,
                format!("invalid cluster bounds {}..{}", start, end),
            ));
        }

        let raw = self.read_at(start, (end - start) as usize)?;
        let cluster = Arc::new(Cluster::decode(number, &raw)?);
        self.cluster_cache.lock().put(number, cluster.clone());
        Ok(cluster)
    }

    fn read_u64(&self, pos: u64) -> Result<u64, ContainerError> {
        let bytes = self.read_at(pos, 8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(b))
    }

    fn read_at(&self, pos: u64, len: usize) -> Result<Vec<u8>, ContainerError> {
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf)?;
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
        Ok(buf)
    }
}

impl EntryLookup for Archive {
    fn lookup(&self, index: u32) -> Result<ContainerEntry, ContainerError> {
        self.entry_at(index)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("entry_count", &self.header.entry_count)
            .field("cluster_count", &self.header.cluster_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::builder::ZimBuilder;
    use crate::zim::cluster::Compression;
    use tempfile::TempDir;

    fn build(dir: &TempDir, compression: Compression) -> PathBuf {
        let path = dir.path().join("test.zim");
        ZimBuilder::new()
            .with_compression(compression)
            .with_blobs_per_cluster(2)
            .article("A/Alpha", "Alpha", "<p>first</p>")
            .article("A/Beta", "Beta", "<p>second</p>")
            .image("I/pic.png", "image/png", vec![1, 2, 3])
            .redirect("A/Gamma", "Gamma", "A/Alpha")
            .with_main_page("A/Alpha")
            .write(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_open_and_read_entries() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open(build(&dir, Compression::None)).unwrap();

        assert_eq!(archive.entry_count(), 4);
        assert_eq!(archive.header().cluster_count, 2);

        let urls: Vec<String> = (0..archive.entry_count())
            .map(|i| archive.entry_at(i).unwrap().url)
            .collect();
        assert_eq!(urls, vec!["A/Alpha", "A/Beta", "A/Gamma", "I/pic.png"]);

        let main = archive.main_page().unwrap();
        assert_eq!(archive.entry_at(main).unwrap().url, "A/Alpha");
    }

    #[test]
    fn test_read_payloads_across_compressions() {
        for compression in [Compression::None, Compression::Zstd, Compression::Xz] {
            let dir = TempDir::new().unwrap();
            let archive = Archive::open(build(&dir, compression)).unwrap();

            let beta = archive.entry_at(1).unwrap();
            assert_eq!(archive.read_payload(&beta).unwrap(), b"<p>second</p>");

            let pic = archive.entry_at(3).unwrap();
            assert_eq!(pic.mimetype.as_deref(), Some("image/png"));
            assert_eq!(archive.read_payload(&pic).unwrap(), vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_redirect_has_no_payload() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open(build(&dir, Compression::None)).unwrap();

        let gamma = archive.entry_at(2).unwrap();
        assert_eq!(gamma.redirect_target(), Some(0));
        assert!(archive.read_payload(&gamma).is_err());
    }

    #[test]
    fn test_entry_reads_stay_small() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("many.zim");
        let mut builder = ZimBuilder::new();
        for i in 0..200 {
            builder = builder.article(&format!("A/Page_{:03}", i), &format!("Page {}", i), "<p>x</p>");
        }
        builder.write(&path).unwrap();

        let archive = Archive::open(&path).unwrap();
        let before = archive.bytes_read();
        for i in 0..archive.entry_count() {
            archive.entry_at(i).unwrap();
        }
        let per_entry = (archive.bytes_read() - before) / u64::from(archive.entry_count());
        assert!(per_entry <= (DIRENT_READ_WINDOW + 8) as u64, "{} bytes per entry", per_entry);
    }

    #[test]
    fn test_long_entry_grows_read_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.zim");
        let long_title = "T".repeat(3 * DIRENT_READ_WINDOW);
        ZimBuilder::new()
            .article("A/Long", &long_title, "<p>long</p>")
            .article("A/Short", "Short", "<p>short</p>")
            .write(&path)
            .unwrap();

        let archive = Archive::open(&path).unwrap();
        let entry = archive.entry_at(0).unwrap();
        assert_eq!(entry.url, "A/Long");
        assert_eq!(entry.title, long_title);
        assert_eq!(archive.entry_at(1).unwrap().title, "Short");
    }

    #[test]
    fn test_out_of_range_index() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open(build(&dir, Compression::None)).unwrap();
        assert!(matches!(
            archive.entry_at(99),
            Err(ContainerError::IndexOutOfRange { index: 99, count: 4 })
        ));
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let err = Archive::open("/nonexistent/file.zim").unwrap_err();
        assert!(matches!(err, ContainerError::OpenIo(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, Compression::None);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..120]).unwrap();

        let err = Archive::open(&path).unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {}", err);
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.zim");
        std::fs::write(&path, vec![0xAB; 512]).unwrap();

        assert!(matches!(
            Archive::open(&path),
            Err(ContainerError::BadHeader(_))
        ));
    }
}
